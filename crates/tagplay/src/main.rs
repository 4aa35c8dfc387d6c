//! tagplay: plays a playlist when an RFID tag is presented, pauses when it is removed.
//!
//! ## Modes
//! - `play <path>`: play one file and exit.
//! - `playlist <identity>`: play `<playlist_dir>/<identity>.m3u` until interrupted.
//! - `listen`: read tag ids line by line (stdin or `--tags`) and let tags drive playback.
//!
//! Playback runs reader → decoder → resampler → writer, with the decoder swapped per
//! track by file extension.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tagplay::cli::{Args, Command};
use tagplay::config::PlayerConfig;
use tagplay::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tagplay=info,tagplay_core=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let cfg = PlayerConfig::resolve(&args)?;
    match args.cmd {
        Some(Command::Play { path }) => runtime::run_play(&cfg, path),
        Some(Command::Playlist { identity }) => runtime::run_playlist(&cfg, identity),
        Some(Command::Listen { tags }) => runtime::run_listen(&cfg, tags.as_deref()),
        None => anyhow::bail!("no command given; see --help"),
    }
}
