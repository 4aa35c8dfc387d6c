//! Playlist manager: ordered tracks, a wrapping cursor, and the identity they were
//! loaded for.
//!
//! Listings come from a [`PlaylistStore`]. The default [`DirPlaylistStore`] reads
//! `<playlist_dir>/<identity>.m3u`, one track per line relative to the music root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("playlist {identity:?} not found at {path}")]
    NotFound { identity: String, path: PathBuf },
    #[error("read playlist {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source of playlist listings.
pub trait PlaylistStore: Send + Sync {
    /// Track paths of `identity`, in play order.
    fn list(&self, identity: &str) -> Result<Vec<PathBuf>, PlaylistError>;
}

/// Reads `<playlist_dir>/<identity>.m3u`.
#[derive(Clone, Debug)]
pub struct DirPlaylistStore {
    playlist_dir: PathBuf,
    music_root: PathBuf,
}

impl DirPlaylistStore {
    pub fn new(playlist_dir: impl Into<PathBuf>, music_root: impl Into<PathBuf>) -> Self {
        Self {
            playlist_dir: playlist_dir.into(),
            music_root: music_root.into(),
        }
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.playlist_dir.join(format!("{identity}.m3u"))
    }
}

impl PlaylistStore for DirPlaylistStore {
    fn list(&self, identity: &str) -> Result<Vec<PathBuf>, PlaylistError> {
        let path = self.path_for(identity);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PlaylistError::NotFound {
                    identity: identity.to_string(),
                    path,
                });
            }
            Err(source) => return Err(PlaylistError::Read { path, source }),
        };
        Ok(parse_listing(&text, &self.music_root))
    }
}

/// Parse an m3u-style listing. Blank and `#` lines are skipped; relative entries are
/// joined onto `root`.
pub fn parse_listing(text: &str, root: &Path) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let entry = Path::new(line);
            if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                root.join(entry)
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct PlaylistState {
    identity: Option<String>,
    tracks: Vec<PathBuf>,
    cursor: usize,
}

/// Shared playlist; clones refer to the same list.
#[derive(Clone)]
pub struct PlaylistManager {
    state: Arc<Mutex<PlaylistState>>,
    store: Arc<dyn PlaylistStore>,
}

impl PlaylistManager {
    pub fn new(store: Arc<dyn PlaylistStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaylistState::default())),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaylistState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `identity` the loaded playlist.
    ///
    /// Reloads from the store and resets the cursor only when the identity changes.
    /// A missing or unreadable listing leaves an empty playlist.
    pub fn load(&self, identity: &str) {
        let mut st = self.lock();
        if st.identity.as_deref() == Some(identity) {
            tracing::debug!(identity, cursor = st.cursor, "playlist already loaded");
            return;
        }
        st.identity = Some(identity.to_string());
        st.cursor = 0;
        st.tracks = match self.store.list(identity) {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!(identity, "playlist unavailable: {e}");
                Vec::new()
            }
        };
        tracing::info!(identity, tracks = st.tracks.len(), "playlist loaded");
    }

    /// Load `identity` only if it yields a track, and return that track.
    ///
    /// The same identity keeps its cursor. An empty, missing or unreadable listing
    /// leaves the loaded playlist and cursor untouched.
    pub fn switch_to(&self, identity: &str) -> Option<PathBuf> {
        let mut st = self.lock();
        if st.identity.as_deref() == Some(identity) {
            return st.tracks.get(st.cursor).cloned();
        }
        let tracks = match self.store.list(identity) {
            Ok(tracks) if !tracks.is_empty() => tracks,
            Ok(_) => {
                tracing::warn!(identity, "playlist is empty; keeping current playlist");
                return None;
            }
            Err(e) => {
                tracing::warn!(identity, "playlist unavailable: {e}");
                return None;
            }
        };
        tracing::info!(identity, tracks = tracks.len(), "playlist loaded");
        let first = tracks.first().cloned();
        st.identity = Some(identity.to_string());
        st.tracks = tracks;
        st.cursor = 0;
        first
    }

    /// Track at the cursor, or `None` for an empty playlist.
    pub fn current(&self) -> Option<PathBuf> {
        let st = self.lock();
        st.tracks.get(st.cursor).cloned()
    }

    /// Move the cursor one step forward, wrapping at the end.
    pub fn advance(&self) {
        let mut st = self.lock();
        if st.tracks.is_empty() {
            return;
        }
        st.cursor = (st.cursor + 1) % st.tracks.len();
    }

    pub fn identity(&self) -> Option<String> {
        self.lock().identity.clone()
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn len(&self) -> usize {
        self.lock().tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tracks.is_empty()
    }
}
