//! Stage model shared by the registry, the graph runtime and stage implementations.
//!
//! A stage is one processing unit of the chain. It is created once, registered under
//! a name, and started again for every run. Per-run work happens on worker threads
//! the stage spawns from [`Stage::start`]; the stage object itself keeps whatever must
//! survive between tracks (open devices, codec state).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use symphonia::core::io::MediaSource;

use crate::command::{CommandSender, RunId, StageStatus};
use crate::config::{MediaFormat, PlaybackConfig};
use crate::decoder_kind::DecoderKind;
use crate::queue::AudioQueue;

/// Registry name of the file reader stage.
pub const READER: &str = "file_reader";
/// Registry name of the sample-rate converter stage.
pub const CONVERTER: &str = "resampler";
/// Registry name of the output writer stage.
pub const WRITER: &str = "output_writer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Source,
    Transform,
    Sink,
}

/// Role a stage can take in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageClass {
    Reader,
    Decoder(DecoderKind),
    Converter,
    Writer,
}

impl StageClass {
    pub fn direction(self) -> Direction {
        match self {
            StageClass::Reader => Direction::Source,
            StageClass::Decoder(_) | StageClass::Converter => Direction::Transform,
            StageClass::Writer => Direction::Sink,
        }
    }
}

/// Static description of a stage: name, role and media format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: String,
    pub class: StageClass,
    pub direction: Direction,
    pub format: MediaFormat,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, class: StageClass, format: MediaFormat) -> Self {
        Self {
            name: name.into(),
            class,
            direction: class.direction(),
            format,
        }
    }

    pub fn reader(format: MediaFormat) -> Self {
        Self::new(READER, StageClass::Reader, format)
    }

    pub fn decoder(kind: DecoderKind, format: MediaFormat) -> Self {
        Self::new(kind.stage_name(), StageClass::Decoder(kind), format)
    }

    pub fn converter(format: MediaFormat) -> Self {
        Self::new(CONVERTER, StageClass::Converter, format)
    }

    pub fn writer(format: MediaFormat) -> Self {
        Self::new(WRITER, StageClass::Writer, format)
    }
}

/// Encoded bytes handed from the reader to a decoder.
pub struct ByteStream {
    pub source: Box<dyn MediaSource>,
    /// Lower-case file extension, used as a format hint.
    pub extension: Option<String>,
}

/// Decoded interleaved `f32` audio handed between decoder, converter and writer.
#[derive(Clone)]
pub struct AudioStream {
    pub rate: u32,
    pub channels: usize,
    pub queue: Arc<AudioQueue>,
}

/// What one stage passes to the next when a run starts.
pub enum Flow {
    Empty,
    Bytes(ByteStream),
    Audio(AudioStream),
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Flow {
    pub fn label(&self) -> &'static str {
        match self {
            Flow::Empty => "empty",
            Flow::Bytes(_) => "bytes",
            Flow::Audio(_) => "audio",
        }
    }
}

/// Per-run control shared by every stage worker of that run.
#[derive(Clone)]
pub struct RunContext {
    run: RunId,
    paused: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    events: CommandSender,
    playback: PlaybackConfig,
}

impl RunContext {
    pub fn new(run: RunId, events: CommandSender, playback: PlaybackConfig) -> Self {
        Self {
            run,
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            interrupted: Arc::new(AtomicBool::new(false)),
            events,
            playback,
        }
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn playback(&self) -> &PlaybackConfig {
        &self.playback
    }

    /// Shared pause flag; the output callback emits silence while it is set.
    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Record that the source ended abnormally (read/decode error mid-track).
    pub fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Send a status event for this run into the controller's channel.
    pub fn report(&self, status: StageStatus) {
        if self.events.report(self.run, status).is_err() {
            tracing::debug!(run = %self.run, "status dropped; controller gone");
        }
    }

    /// Report a worker failure for `stage`.
    pub fn fail(&self, stage: &str, err: &anyhow::Error) {
        tracing::error!(run = %self.run, stage, "stage failed: {err:#}");
        self.report(StageStatus::Failed {
            stage: stage.to_string(),
            reason: format!("{err:#}"),
        });
    }
}

/// A processing unit of the chain.
///
/// Lifecycle calls arrive from the graph runtime in chain order; `start` runs once per
/// run and must not block on audio being produced.
pub trait Stage: Send {
    fn descriptor(&self) -> &StageDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Point a source stage at a new input. Only readers accept a URI.
    fn set_uri(&mut self, uri: &Path) -> Result<()> {
        bail!("stage {} does not take a source uri ({})", self.name(), uri.display())
    }

    /// Begin one run: consume `input` from the upstream stage and return what feeds the
    /// downstream stage.
    fn start(&mut self, input: Flow, ctx: &RunContext) -> Result<Flow>;

    /// Ask workers to stop. Must not block.
    fn stop(&mut self) {}

    /// Block until every worker of the current run has exited.
    fn wait_for_stop(&mut self) {}

    /// Drop all per-run state. The stage stays registered and can start again.
    fn terminate(&mut self) {
        self.stop();
        self.wait_for_stop();
    }

    /// Discard buffered audio of the last run.
    fn reset_buffers(&mut self) {}

    /// Reset internal processing state (codec state, counters).
    fn reset_state(&mut self) {}

    /// Free the stage's resources after it has been unregistered.
    fn release(self: Box<Self>) {}
}
