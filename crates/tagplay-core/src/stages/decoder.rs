//! Streaming decode stage.
//!
//! Uses Symphonia to:
//! - detect the container from the reader's bytes (extension hint from the kind)
//! - decode packets into interleaved `f32` samples
//! - push samples into a bounded [`AudioQueue`] from a background thread
//!
//! The queue is closed on EOF, error, or stop. A read or codec error mid-track marks the
//! run interrupted so the writer reports `Stopped` instead of `Finished`.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::MediaFormat;
use crate::decoder_kind::DecoderKind;
use crate::queue::{AudioQueue, capacity_for};
use crate::stage::{AudioStream, ByteStream, Flow, RunContext, Stage, StageDescriptor};

/// Probed source ready to decode.
struct OpenedSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    rate: u32,
    channels: usize,
}

struct Worker {
    queue: Arc<AudioQueue>,
    join: Option<JoinHandle<()>>,
}

/// Decoder stage for one [`DecoderKind`].
pub struct SymphoniaDecoder {
    desc: StageDescriptor,
    kind: DecoderKind,
    worker: Option<Worker>,
}

impl SymphoniaDecoder {
    pub fn new(kind: DecoderKind, format: MediaFormat) -> Self {
        Self {
            desc: StageDescriptor::decoder(kind, format),
            kind,
            worker: None,
        }
    }

    pub fn kind(&self) -> DecoderKind {
        self.kind
    }
}

impl Stage for SymphoniaDecoder {
    fn descriptor(&self) -> &StageDescriptor {
        &self.desc
    }

    fn start(&mut self, input: Flow, ctx: &RunContext) -> Result<Flow> {
        let bytes = match input {
            Flow::Bytes(bytes) => bytes,
            other => bail!("{} expects encoded bytes, got {}", self.desc.name, other.label()),
        };
        self.stop();
        self.wait_for_stop();

        let opened = open_source(bytes, self.kind)?;
        let (rate, channels) = (opened.rate, opened.channels);
        let capacity = capacity_for(rate, channels, ctx.playback().buffer_seconds);
        let queue = Arc::new(AudioQueue::new(channels, capacity));
        tracing::info!(decoder = %self.kind, rate_hz = rate, channels, "decode started");

        let join = thread::Builder::new()
            .name(format!("decode-{}", self.kind.extension()))
            .spawn({
                let queue = queue.clone();
                let ctx = ctx.clone();
                let name = self.desc.name.clone();
                move || {
                    if let Err(e) = decode_loop(opened, &queue, &ctx) {
                        tracing::warn!(stage = %name, run = %ctx.run(), "decode interrupted: {e:#}");
                        ctx.mark_interrupted();
                    }
                    queue.close();
                }
            })
            .context("spawn decoder thread")?;

        self.worker = Some(Worker {
            queue: queue.clone(),
            join: Some(join),
        });
        Ok(Flow::Audio(AudioStream {
            rate,
            channels,
            queue,
        }))
    }

    fn stop(&mut self) {
        if let Some(w) = &self.worker {
            w.queue.close();
        }
    }

    fn wait_for_stop(&mut self) {
        let Some(join) = self.worker.as_mut().and_then(|w| w.join.take()) else {
            return;
        };
        if join.join().is_err() {
            tracing::error!(stage = %self.desc.name, "decoder thread panicked");
        }
    }

    fn reset_buffers(&mut self) {
        if let Some(w) = &self.worker {
            w.queue.clear();
        }
    }

    fn reset_state(&mut self) {
        self.wait_for_stop();
        self.worker = None;
    }

    fn release(mut self: Box<Self>) {
        self.terminate();
        tracing::debug!(stage = %self.desc.name, "decoder released");
    }
}

fn open_source(bytes: ByteStream, kind: DecoderKind) -> Result<OpenedSource> {
    let mut hint = Hint::new();
    hint.with_extension(bytes.extension.as_deref().unwrap_or(kind.extension()));

    let mss = MediaSourceStream::new(bytes.source, Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("detect source format")?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    let track_id = track.id;
    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("create codec")?;

    Ok(OpenedSource {
        format,
        decoder,
        track_id,
        rate,
        channels,
    })
}

/// Decode until EOF, cancel, or a closed queue. Bad packets are skipped.
fn decode_loop(mut src: OpenedSource, queue: &AudioQueue, ctx: &RunContext) -> Result<()> {
    loop {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let packet = match src.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e).context("read packet"),
        };
        if packet.track_id() != src.track_id {
            continue;
        }

        let decoded = match src.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        if !queue.push_blocking(sample_buf.samples()) {
            return Ok(());
        }
    }
}
