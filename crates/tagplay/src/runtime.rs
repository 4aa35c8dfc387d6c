//! Player runtime helpers.
//!
//! Builds the stage graph and controller from a [`PlayerConfig`] and drives it in one
//! of three modes: a single file, a playlist, or tag-driven playback.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tagplay_core::command::{self, CommandSender, StartRef};
use tagplay_core::controller::{ControllerHandle, PlaybackController, spawn_controller};
use tagplay_core::device;
use tagplay_core::pipeline::Pipeline;
use tagplay_core::playlist::{DirPlaylistStore, PlaylistManager};
use tagplay_core::sensor::{TagDispatcher, run_sensor_loop};
use tagplay_core::stages::{self, StageSetup};
use tagplay_core::status::{PlayerStatusState, StatusSnapshot};

use crate::config::PlayerConfig;
use crate::sensor::LineTagSensor;

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Controller thread plus the status store it publishes to.
pub struct Player {
    handle: ControllerHandle,
    status: Arc<Mutex<PlayerStatusState>>,
}

impl Player {
    /// Register the standard stages, link the startup chain and spawn the controller.
    pub fn start(cfg: &PlayerConfig) -> Result<Self> {
        let (tx, rx) = command::channel();
        let mut pipeline = Pipeline::new(tx.clone(), cfg.playback.clone());
        let setup = StageSetup {
            formats: cfg.output,
            device: normalize_device_name(cfg.device.clone()),
        };
        stages::register_defaults(&mut pipeline, &setup).context("register stages")?;

        let store = DirPlaylistStore::new(&cfg.playlist_dir, &cfg.music_root);
        let playlist = PlaylistManager::new(Arc::new(store));
        let status = PlayerStatusState::shared();
        let controller = PlaybackController::new(
            pipeline,
            stages::default_chain(),
            playlist,
            rx,
            status.clone(),
        )
        .context("link startup chain")?;
        let handle = spawn_controller(controller, tx).context("spawn controller thread")?;
        tracing::info!(
            music_root = %cfg.music_root.display(),
            playlist_dir = %cfg.playlist_dir.display(),
            output_hz = cfg.output.output.sample_rate,
            "player ready"
        );
        Ok(Self { handle, status })
    }

    pub fn sender(&self) -> CommandSender {
        self.handle.sender()
    }

    /// Send `Shutdown` on ctrl-c.
    pub fn install_ctrlc(&self) -> Result<()> {
        let tx = self.sender();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received");
            if tx.shutdown().is_err() {
                std::process::exit(130);
            }
        })
        .context("install ctrl-c handler")
    }

    fn snapshot(&self) -> StatusSnapshot {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    /// Block until the controller records how the current track ended.
    fn wait_for_end(&self) {
        loop {
            let snapshot = self.snapshot();
            if snapshot.end_reason.is_some() {
                log_status(&snapshot, "track ended");
                return;
            }
            thread::sleep(STATUS_POLL_INTERVAL);
        }
    }

    /// Wait for the controller loop to exit.
    pub fn join(self) -> Result<()> {
        let Player { handle, status } = self;
        let result = handle
            .join()
            .map_err(|_| anyhow!("controller thread panicked"));
        let snapshot = status.lock().unwrap_or_else(|e| e.into_inner()).snapshot();
        log_status(&snapshot, "player stopped");
        result
    }
}

fn log_status(snapshot: &StatusSnapshot, message: &str) {
    match snapshot.to_json() {
        Ok(json) => tracing::info!(status = %json, "{message}"),
        Err(e) => tracing::warn!("status not serializable: {e}"),
    }
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for name in device::list_devices(&host)? {
        println!("- {name}");
    }
    Ok(())
}

/// Play one file, then shut down.
pub fn run_play(cfg: &PlayerConfig, path: PathBuf) -> Result<()> {
    let player = Player::start(cfg)?;
    player.install_ctrlc()?;
    player.sender().start(StartRef::Track(path))?;
    player.wait_for_end();
    // Already closed when ctrl-c shut the controller down first.
    let _ = player.sender().shutdown();
    player.join()
}

/// Play a playlist until interrupted.
pub fn run_playlist(cfg: &PlayerConfig, identity: String) -> Result<()> {
    let player = Player::start(cfg)?;
    player.install_ctrlc()?;
    player.sender().start(StartRef::Playlist(identity))?;
    player.join()
}

/// Drive playback from tag ids read from `tags` (stdin when `None`).
pub fn run_listen(cfg: &PlayerConfig, tags: Option<&Path>) -> Result<()> {
    let source = open_tag_source(tags)?;
    let mut sensor = LineTagSensor::spawn(source, cfg.sensor.quiet())?;

    let player = Player::start(cfg)?;
    player.install_ctrlc()?;

    let stop = Arc::new(AtomicBool::new(false));
    let dispatcher = TagDispatcher::new(player.sender());
    let interval = cfg.sensor.poll_interval();
    let sensor_join = thread::Builder::new()
        .name("tag-sensor".to_string())
        .spawn({
            let stop = stop.clone();
            move || run_sensor_loop(&mut sensor, dispatcher, interval, stop)
        })
        .context("spawn sensor thread")?;

    let result = player.join();
    stop.store(true, Ordering::Relaxed);
    if sensor_join.join().is_err() {
        tracing::error!("sensor thread panicked");
    }
    result
}

fn open_tag_source(tags: Option<&Path>) -> Result<Box<dyn BufRead + Send>> {
    match tags {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("open tag source {:?}", path))?;
            tracing::info!(path = %path.display(), "reading tags");
            Ok(Box::new(BufReader::new(file)))
        }
        None => {
            tracing::info!("reading tags from stdin");
            Ok(Box::new(BufReader::new(io::stdin())))
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
