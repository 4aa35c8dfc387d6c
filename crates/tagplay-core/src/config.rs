use serde::Deserialize;

/// Playback tuning parameters shared by the decode/resample/output stages.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Decoder/resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

/// Media format carried by a stage: sample rate, bit depth and channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct MediaFormat {
    pub sample_rate: u32,
    pub bits: u16,
    pub channels: u16,
}

impl MediaFormat {
    pub const fn new(sample_rate: u32, bits: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits,
            channels,
        }
    }

    /// Nominal format of files on the music card.
    pub const fn source_default() -> Self {
        Self::new(44_100, 16, 2)
    }

    /// Fixed format of the output writer.
    pub const fn output_default() -> Self {
        Self::new(48_000, 16, 2)
    }
}

/// Formats used when building the default stage set.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct OutputFormat {
    /// Format the reader/decoder stages advertise.
    pub source: MediaFormat,
    /// Format the converter produces and the writer plays.
    pub output: MediaFormat,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            source: MediaFormat::source_default(),
            output: MediaFormat::output_default(),
        }
    }
}
