//! Player configuration.
//!
//! Loaded from an optional TOML file, then overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use tagplay_core::config::{OutputFormat, PlaybackConfig};

use crate::cli::Args;

/// Top-level player configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Root relative playlist entries resolve against.
    pub music_root: PathBuf,
    /// Directory holding `<identity>.m3u` playlists.
    pub playlist_dir: PathBuf,
    /// Output device substring match.
    pub device: Option<String>,
    pub playback: PlaybackConfig,
    pub output: OutputFormat,
    pub sensor: SensorConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            music_root: PathBuf::from("."),
            playlist_dir: PathBuf::from("playlists"),
            device: None,
            playback: PlaybackConfig::default(),
            output: OutputFormat::default(),
            sensor: SensorConfig::default(),
        }
    }
}

/// Tag sensor timing.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Silence after which a present tag counts as removed; 0 disables removal.
    pub quiet_ms: u64,
    /// Delay between sensor polls.
    pub poll_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            quiet_ms: 200,
            poll_ms: 100,
        }
    }
}

impl SensorConfig {
    pub fn quiet(&self) -> Option<Duration> {
        (self.quiet_ms > 0).then(|| Duration::from_millis(self.quiet_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

impl PlayerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<PlayerConfig>(raw)?)
    }

    /// Config file (if any) with flag overrides applied.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(args);
        Ok(cfg)
    }

    fn apply_overrides(&mut self, args: &Args) {
        if let Some(root) = &args.music_root {
            self.music_root = root.clone();
        }
        if let Some(dir) = &args.playlist_dir {
            self.playlist_dir = dir.clone();
        }
        if args.device.is_some() {
            self.device = args.device.clone();
        }
        if let Some(rate) = args.sample_rate {
            self.output.output.sample_rate = rate;
        }
        if let Some(frames) = args.chunk_frames {
            self.playback.chunk_frames = frames;
        }
        if let Some(frames) = args.refill_max_frames {
            self.playback.refill_max_frames = frames;
        }
        if let Some(secs) = args.buffer_seconds {
            self.playback.buffer_seconds = secs;
        }
    }
}
