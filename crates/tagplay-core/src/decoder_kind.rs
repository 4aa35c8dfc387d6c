//! Decoder variant selection from a track's filename suffix.

use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Closed set of decoder stages the chain can carry in its decoder slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    Mp3,
    Aac,
    Wav,
}

impl DecoderKind {
    pub const ALL: [DecoderKind; 3] = [DecoderKind::Mp3, DecoderKind::Aac, DecoderKind::Wav];

    /// Pick the decoder for `path` by its extension (case-insensitive).
    ///
    /// Never fails: unknown or missing suffixes fall back to MP3.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(DecoderKind::Mp3)
    }

    /// Map a bare extension (no dot) to a decoder kind.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "aac" => DecoderKind::Aac,
            "wav" => DecoderKind::Wav,
            _ => DecoderKind::Mp3,
        }
    }

    /// Registry name of the decoder stage for this kind.
    pub fn stage_name(self) -> &'static str {
        match self {
            DecoderKind::Mp3 => "mp3_decoder",
            DecoderKind::Aac => "aac_decoder",
            DecoderKind::Wav => "wav_decoder",
        }
    }

    /// Extension used as a format hint.
    pub fn extension(self) -> &'static str {
        match self {
            DecoderKind::Mp3 => "mp3",
            DecoderKind::Aac => "aac",
            DecoderKind::Wav => "wav",
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DecoderKind::Mp3 => "MP3",
            DecoderKind::Aac => "AAC",
            DecoderKind::Wav => "WAV",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_maps_known_suffixes() {
        assert_eq!(DecoderKind::from_path(Path::new("a.mp3")), DecoderKind::Mp3);
        assert_eq!(DecoderKind::from_path(Path::new("b.aac")), DecoderKind::Aac);
        assert_eq!(DecoderKind::from_path(Path::new("c.wav")), DecoderKind::Wav);
    }

    #[test]
    fn from_path_is_case_insensitive() {
        assert_eq!(DecoderKind::from_path(Path::new("/music/A.WAV")), DecoderKind::Wav);
        assert_eq!(DecoderKind::from_path(Path::new("/music/b.Aac")), DecoderKind::Aac);
    }

    #[test]
    fn from_path_defaults_to_mp3() {
        assert_eq!(DecoderKind::from_path(Path::new("song.flac")), DecoderKind::Mp3);
        assert_eq!(DecoderKind::from_path(Path::new("no_suffix")), DecoderKind::Mp3);
        assert_eq!(DecoderKind::from_path(Path::new("")), DecoderKind::Mp3);
        assert_eq!(DecoderKind::from_path(Path::new(".wav")), DecoderKind::Mp3);
    }

    #[test]
    fn from_path_uses_last_suffix_only() {
        assert_eq!(
            DecoderKind::from_path(Path::new("archive.wav.mp3")),
            DecoderKind::Mp3
        );
        assert_eq!(
            DecoderKind::from_path(Path::new("dir.aac/track.wav")),
            DecoderKind::Wav
        );
    }

    #[test]
    fn stage_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            DecoderKind::ALL.iter().map(|k| k.stage_name()).collect();
        assert_eq!(names.len(), DecoderKind::ALL.len());
    }
}
