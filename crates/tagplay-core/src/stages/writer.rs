//! Output stage (CPAL output stream).
//!
//! The device is opened once, on the first run, by a long-lived `output-device` thread
//! that owns the CPAL stream (streams are not `Send`). The stream's callback reads
//! whatever [`OutputFeed`] is attached, so starting a run only swaps the queue and pause
//! flag in. A per-run watcher waits for the queue to drain or the run to be cancelled,
//! detaches the feed and reports how the run ended. `release` closes the stream.
//!
//! The real-time callback:
//! - outputs silence while no run is attached or the run is paused
//! - refills a small local buffer from the queue without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::command::StageStatus;
use crate::config::MediaFormat;
use crate::device;
use crate::queue::AudioQueue;
use crate::stage::{AudioStream, Flow, RunContext, Stage, StageDescriptor, WRITER};

/// Time left for the device to play out its last buffer after the queue drains.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

pub struct OutputWriter {
    desc: StageDescriptor,
    device: Option<String>,
    output: Option<OutputDevice>,
    queue: Option<Arc<AudioQueue>>,
    cancel: Option<Arc<AtomicBool>>,
    join: Option<JoinHandle<()>>,
}

impl OutputWriter {
    /// `device` filters output devices by name; `None` uses the host default.
    pub fn new(format: MediaFormat, device: Option<String>) -> Self {
        Self {
            desc: StageDescriptor::writer(format),
            device,
            output: None,
            queue: None,
            cancel: None,
            join: None,
        }
    }

    /// Open stream for `rate_hz`, reopening only when the rate changed or the
    /// device went away.
    fn output_for(&mut self, rate_hz: u32, refill_max_frames: usize) -> Result<&OutputDevice> {
        let reusable = self
            .output
            .as_ref()
            .is_some_and(|out| out.requested_hz == rate_hz && !out.is_broken());
        if !reusable {
            if let Some(mut old) = self.output.take() {
                old.close();
            }
            let opened = OutputDevice::open(self.device.clone(), rate_hz, refill_max_frames)?;
            self.output = Some(opened);
        }
        self.output
            .as_ref()
            .ok_or_else(|| anyhow!("output stream not open"))
    }
}

impl Stage for OutputWriter {
    fn descriptor(&self) -> &StageDescriptor {
        &self.desc
    }

    fn start(&mut self, input: Flow, ctx: &RunContext) -> Result<Flow> {
        let audio = match input {
            Flow::Audio(audio) => audio,
            other => bail!("{WRITER} expects decoded audio, got {}", other.label()),
        };
        self.stop();
        self.wait_for_stop();

        let output = self.output_for(audio.rate, ctx.playback().refill_max_frames)?;
        let feed = output.feed.clone();
        let generation = feed.attach(&audio.queue, ctx);

        self.queue = Some(audio.queue.clone());
        self.cancel = Some(ctx.cancel_flag());
        let ctx = ctx.clone();
        let join = thread::Builder::new()
            .name("output-writer".to_string())
            .spawn(move || watch_run(&audio, &ctx, &feed, generation))
            .context("spawn writer thread")?;
        self.join = Some(join);
        Ok(Flow::Empty)
    }

    fn stop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.store(true, Ordering::Relaxed);
        }
    }

    fn wait_for_stop(&mut self) {
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("writer thread panicked");
        }
    }

    fn reset_buffers(&mut self) {
        if let Some(q) = &self.queue {
            q.clear();
        }
    }

    fn reset_state(&mut self) {
        self.wait_for_stop();
        self.queue = None;
        self.cancel = None;
    }

    fn release(mut self: Box<Self>) {
        self.terminate();
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }
}

/// Block until `audio` drains or the run is cancelled, then report the outcome.
fn watch_run(audio: &AudioStream, ctx: &RunContext, feed: &OutputFeed, generation: u64) {
    let drained = audio.queue.wait_drained(&ctx.cancel_flag());
    if drained {
        thread::sleep(DRAIN_GRACE);
    }
    feed.detach(generation);
    match drained {
        true if ctx.was_interrupted() => ctx.report(StageStatus::Stopped),
        true => ctx.report(StageStatus::Finished),
        false => tracing::debug!(run = %ctx.run(), "playback cancelled"),
    }
}

#[derive(Default)]
struct FeedSlot {
    generation: u64,
    queue: Option<Arc<AudioQueue>>,
    paused: Option<Arc<AtomicBool>>,
    run: Option<RunContext>,
}

/// The run the output stream is currently playing, swapped in and out between runs.
#[derive(Clone, Default)]
pub struct OutputFeed {
    slot: Arc<Mutex<FeedSlot>>,
}

impl OutputFeed {
    fn lock(&self) -> MutexGuard<'_, FeedSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Play `queue` for `ctx`'s run; returns the generation to detach with.
    pub fn attach(&self, queue: &Arc<AudioQueue>, ctx: &RunContext) -> u64 {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.queue = Some(queue.clone());
        slot.paused = Some(ctx.paused_flag());
        slot.run = Some(ctx.clone());
        slot.generation
    }

    /// Go silent, unless a newer run has been attached since `generation`.
    pub fn detach(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation == generation {
            slot.queue = None;
            slot.paused = None;
            slot.run = None;
        }
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Fail and cancel the attached run, if any.
    fn fail_run(&self, err: &anyhow::Error) {
        let run = self.lock().run.clone();
        if let Some(ctx) = run {
            ctx.fail(WRITER, err);
            ctx.cancel_flag().store(true, Ordering::Relaxed);
        }
    }
}

/// Callback-side reader of an [`OutputFeed`].
struct FeedReader {
    feed: OutputFeed,
    generation: u64,
    local: LocalBuffer,
    refill_max_frames: usize,
}

impl FeedReader {
    fn new(feed: OutputFeed, refill_max_frames: usize) -> Self {
        Self {
            feed,
            generation: 0,
            local: LocalBuffer::new(1),
            refill_max_frames: refill_max_frames.max(1),
        }
    }

    /// Fill `data` (interleaved, `channels_out` wide) from the attached run.
    fn fill<T>(&mut self, data: &mut [T], channels_out: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
        // Never block the real-time thread on a run swap.
        let Ok(slot) = self.feed.slot.try_lock() else {
            data.fill(silence);
            return;
        };
        if slot.generation != self.generation {
            self.generation = slot.generation;
            let channels = slot.queue.as_ref().map_or(1, |q| q.channels());
            self.local = LocalBuffer::new(channels);
        }
        let queue = slot.queue.clone();
        let paused = slot
            .paused
            .as_ref()
            .is_some_and(|p| p.load(Ordering::Relaxed));
        drop(slot);

        let Some(queue) = queue.filter(|_| !paused) else {
            data.fill(silence);
            return;
        };

        let channels_out = channels_out.max(1);
        let frames = data.len() / channels_out;
        for frame in 0..frames {
            if self.local.is_empty() {
                match queue.try_pop(self.refill_max_frames) {
                    Some(v) => self.local.refill(v),
                    None => {
                        data[frame * channels_out..].fill(silence);
                        break;
                    }
                }
            }
            for ch in 0..channels_out {
                let sample = self.local.next_mapped(channels_out, ch);
                data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
            }
        }
    }
}

/// The open output: a thread holding the CPAL stream until closed.
struct OutputDevice {
    feed: OutputFeed,
    requested_hz: u32,
    broken: Arc<AtomicBool>,
    close_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl OutputDevice {
    /// Spawn the device thread and wait until its stream is playing.
    fn open(device_name: Option<String>, rate_hz: u32, refill_max_frames: usize) -> Result<Self> {
        let feed = OutputFeed::default();
        let broken = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (close_tx, close_rx) = crossbeam_channel::bounded::<()>(0);

        let join = thread::Builder::new()
            .name("output-device".to_string())
            .spawn({
                let feed = feed.clone();
                let broken = broken.clone();
                move || {
                    let opened = play_stream(
                        device_name.as_deref(),
                        rate_hz,
                        feed,
                        refill_max_frames,
                        broken,
                    );
                    let stream = match opened {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{e:#}")));
                            return;
                        }
                    };
                    // Returns once the sender is dropped.
                    let _ = close_rx.recv();
                    drop(stream);
                    tracing::info!("output stream closed");
                }
            })
            .context("spawn output device thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                feed,
                requested_hz: rate_hz,
                broken,
                close_tx: Some(close_tx),
                join: Some(join),
            }),
            Ok(Err(reason)) => {
                let _ = join.join();
                Err(anyhow!("open output stream: {reason}"))
            }
            Err(_) => {
                let _ = join.join();
                Err(anyhow!("output device thread exited before opening"))
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Drop the stream and join the device thread.
    fn close(&mut self) {
        self.close_tx.take();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("output device thread panicked");
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open the device and start a stream that plays from `feed`.
fn play_stream(
    device_name: Option<&str>,
    rate_hz: u32,
    feed: OutputFeed,
    refill_max_frames: usize,
    broken: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let target = device::open_output(device_name, rate_hz)?;
    if target.stream_config.sample_rate != rate_hz {
        tracing::warn!(
            stream_hz = rate_hz,
            device_hz = target.stream_config.sample_rate,
            "device does not support the output rate"
        );
    }
    tracing::info!(
        channels = target.stream_config.channels,
        sample_format = ?target.config.sample_format(),
        buffer_size = ?target.stream_config.buffer_size,
        "output stream opening"
    );

    let stream = build_output_stream(
        &target.device,
        &target.stream_config,
        target.config.sample_format(),
        feed,
        refill_max_frames,
        broken,
    )?;
    stream.play().context("start output stream")?;
    Ok(stream)
}

/// Build a CPAL output stream that plays interleaved `f32` audio from `feed`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    feed: OutputFeed,
    refill_max_frames: usize,
    broken: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let reader = FeedReader::new(feed.clone(), refill_max_frames);
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, reader, feed, broken),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, reader, feed, broken),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, reader, feed, broken),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, reader, feed, broken),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut reader: FeedReader,
    feed: OutputFeed,
    broken: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;

    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            broken.store(true, Ordering::Relaxed);
            feed.fail_run(&anyhow!("output device lost: {err}"));
        }
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| reader.fill(data, channels_out),
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Samples fetched from the queue, consumed frame by frame by the callback.
struct LocalBuffer {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl LocalBuffer {
    fn new(src_channels: usize) -> Self {
        Self {
            pos: 0,
            src_channels: src_channels.max(1),
            src: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn refill(&mut self, samples: Vec<f32>) {
        self.src = samples;
        self.pos = 0;
    }

    /// Output sample for `dst_ch` of the current frame; advances after the last channel.
    ///
    /// - mono → stereo: duplicate channel 0
    /// - stereo → mono: average L/R
    /// - other layouts: clamp to the available channels
    fn next_mapped(&mut self, dst_channels: usize, dst_ch: usize) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let get = |ch: usize| -> f32 {
            let idx = self.pos + ch;
            if ch < self.src_channels && idx < self.src.len() {
                self.src[idx]
            } else {
                0.0
            }
        };
        let out = match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src - 1)),
        };
        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}
