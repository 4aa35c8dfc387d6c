use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "tagplay", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// TOML config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory relative playlist entries resolve against
    #[arg(long)]
    pub music_root: Option<PathBuf>,

    /// Directory holding `<identity>.m3u` playlists
    #[arg(long)]
    pub playlist_dir: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Playback callback refill cap (frames)
    #[arg(long)]
    pub refill_max_frames: Option<usize>,

    /// Queue buffer target in seconds (per stage)
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play one file and exit
    Play {
        /// Path to audio file (.mp3, .aac, .wav)
        path: PathBuf,
    },

    /// Play a playlist by identity until interrupted
    Playlist {
        /// Playlist identity, e.g. a tag id
        identity: String,
    },

    /// Read tag ids line by line and drive playback from them
    Listen {
        /// File or FIFO to read tag ids from (stdin when omitted)
        #[arg(long)]
        tags: Option<PathBuf>,
    },
}
