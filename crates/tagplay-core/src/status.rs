use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::command::RunId;
use crate::decoder_kind::DecoderKind;

/// Controller state as seen from outside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Why the last run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEndReason {
    Eof,
    Stopped,
    Error,
}

/// Shared playback status updated by the controller loop.
#[derive(Debug, Default)]
pub struct PlayerStatusState {
    pub state: PlayerState,
    /// Path of the active track.
    pub now_playing: Option<String>,
    /// Decoder linked for the active track.
    pub decoder: Option<DecoderKind>,
    /// Identity of the loaded playlist.
    pub playlist: Option<String>,
    /// Playlist cursor when the active track came from a playlist.
    pub cursor: Option<usize>,
    /// Run id of the active chain run.
    pub run: Option<u64>,
    /// Terminal reason of the previous run.
    pub end_reason: Option<PlaybackEndReason>,
    pub last_error: Option<String>,
}

/// Serializable copy of [`PlayerStatusState`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: PlayerState,
    pub paused: bool,
    pub now_playing: Option<String>,
    pub decoder: Option<DecoderKind>,
    pub playlist: Option<String>,
    pub cursor: Option<usize>,
    pub run: Option<u64>,
    pub end_reason: Option<PlaybackEndReason>,
    pub last_error: Option<String>,
}

impl PlayerStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            paused: self.state == PlayerState::Paused,
            now_playing: self.now_playing.clone(),
            decoder: self.decoder,
            playlist: self.playlist.clone(),
            cursor: self.cursor,
            run: self.run,
            end_reason: self.end_reason,
            last_error: self.last_error.clone(),
        }
    }

    /// Record a freshly started run.
    pub fn started(&mut self, track: &str, decoder: DecoderKind, run: RunId) {
        self.state = PlayerState::Playing;
        self.now_playing = Some(track.to_string());
        self.decoder = Some(decoder);
        self.run = Some(run.0);
        self.last_error = None;
    }

    /// Clear track-specific fields when playback ends.
    pub fn clear_playback(&mut self, reason: PlaybackEndReason) {
        self.state = PlayerState::Idle;
        self.now_playing = None;
        self.decoder = None;
        self.cursor = None;
        self.run = None;
        self.end_reason = Some(reason);
    }
}

impl StatusSnapshot {
    /// Compact JSON form, as written to logs.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
