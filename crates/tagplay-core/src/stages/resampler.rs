//! Streaming resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the source rate to the
//! writer's output rate. Runs in a background thread and writes into a bounded
//! [`AudioQueue`] consumed by the writer. Equal rates pass the decoder's queue through.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::config::MediaFormat;
use crate::queue::{AudioQueue, capacity_for};
use crate::stage::{AudioStream, CONVERTER, Flow, RunContext, Stage, StageDescriptor};

struct Worker {
    src: Arc<AudioQueue>,
    dst: Arc<AudioQueue>,
    join: Option<JoinHandle<()>>,
}

/// Sample-rate converter to the descriptor's output rate.
pub struct RateConverter {
    desc: StageDescriptor,
    worker: Option<Worker>,
}

impl RateConverter {
    pub fn new(output: MediaFormat) -> Self {
        Self {
            desc: StageDescriptor::converter(output),
            worker: None,
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.desc.format.sample_rate
    }
}

impl Stage for RateConverter {
    fn descriptor(&self) -> &StageDescriptor {
        &self.desc
    }

    fn start(&mut self, input: Flow, ctx: &RunContext) -> Result<Flow> {
        let src = match input {
            Flow::Audio(src) => src,
            other => bail!("{} expects decoded audio, got {}", CONVERTER, other.label()),
        };
        self.stop();
        self.wait_for_stop();
        self.worker = None;

        let dst_rate = self.output_rate();
        if src.rate == dst_rate {
            tracing::info!(rate_hz = dst_rate, "resample skipped");
            return Ok(Flow::Audio(src));
        }

        let channels = src.channels;
        let capacity = capacity_for(dst_rate, channels, ctx.playback().buffer_seconds);
        let dst = Arc::new(AudioQueue::new(channels, capacity));
        let chunk_frames = ctx.playback().chunk_frames.max(1);
        let src_rate = src.rate;

        let join = thread::Builder::new()
            .name("resample".to_string())
            .spawn({
                let srcq = src.queue.clone();
                let dstq = dst.clone();
                let ctx = ctx.clone();
                move || {
                    if let Err(e) = resample_loop(&srcq, &dstq, src_rate, dst_rate, chunk_frames) {
                        ctx.fail(CONVERTER, &e);
                        srcq.close();
                    }
                    dstq.close();
                }
            })
            .context("spawn resampler thread")?;
        tracing::info!(from_hz = src_rate, to_hz = dst_rate, "resampling");

        self.worker = Some(Worker {
            src: src.queue,
            dst: dst.clone(),
            join: Some(join),
        });
        Ok(Flow::Audio(AudioStream {
            rate: dst_rate,
            channels,
            queue: dst,
        }))
    }

    fn stop(&mut self) {
        if let Some(w) = &self.worker {
            w.src.close();
            w.dst.close();
        }
    }

    fn wait_for_stop(&mut self) {
        let Some(join) = self.worker.as_mut().and_then(|w| w.join.take()) else {
            return;
        };
        if join.join().is_err() {
            tracing::error!("resampler thread panicked");
        }
    }

    fn reset_buffers(&mut self) {
        if let Some(w) = &self.worker {
            w.dst.clear();
        }
    }

    fn reset_state(&mut self) {
        self.wait_for_stop();
        self.worker = None;
    }
}

/// Pull fixed chunks from `srcq`, resample, push into `dstq`; flush the tail on close.
fn resample_loop(
    srcq: &AudioQueue,
    dstq: &AudioQueue,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<()> {
    let channels = srcq.channels();
    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler =
        Async::<f32>::new_sinc(f_ratio, 1.1, &params, chunk_frames, channels, FixedAsync::Input)
            .map_err(|e| anyhow!("resampler init: {e}"))?;

    let out_frames = (f_ratio * 1.1).ceil() as usize * chunk_frames + chunk_frames;
    let mut out = vec![0.0f32; channels * out_frames];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut process = |input: &[f32], frames: usize, partial: Option<usize>| -> Result<()> {
        let input_adapter = InterleavedSlice::new(input, channels, frames)
            .map_err(|e| anyhow!("input slice: {e}"))?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut out, channels, out_frames)
            .map_err(|e| anyhow!("output slice: {e}"))?;
        indexing.partial_len = partial;
        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resample: {e}"))?;
        let produced = nbr_out * channels;
        if produced > 0 {
            dstq.push_blocking(&out[..produced]);
        }
        Ok(())
    };

    while let Some(chunk) = srcq.pop_exact(chunk_frames) {
        process(&chunk, chunk_frames, None)?;
        if dstq.is_closed() {
            return Ok(());
        }
    }
    while let Some(tail) = srcq.pop_up_to(chunk_frames) {
        let tail_frames = tail.len() / channels;
        process(&tail, tail_frames, Some(tail_frames))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{self, RunId};
    use crate::config::PlaybackConfig;

    fn ctx() -> (RunContext, command::CommandReceiver) {
        let (tx, rx) = command::channel();
        (RunContext::new(RunId(1), tx, PlaybackConfig::default()), rx)
    }

    fn audio(rate: u32, channels: usize, frames: usize) -> AudioStream {
        let queue = Arc::new(AudioQueue::new(channels, frames * channels + channels));
        let samples: Vec<f32> = (0..frames * channels)
            .map(|i| ((i / channels) as f32 * 0.05).sin() * 0.5)
            .collect();
        queue.push_blocking(&samples);
        queue.close();
        AudioStream {
            rate,
            channels,
            queue,
        }
    }

    #[test]
    fn equal_rates_pass_the_queue_through() {
        let (ctx, _rx) = ctx();
        let input = audio(48_000, 2, 16);
        let original = input.queue.clone();
        let mut conv = RateConverter::new(MediaFormat::output_default());

        let Flow::Audio(out) = conv.start(Flow::Audio(input), &ctx).unwrap() else {
            panic!("converter should yield audio");
        };
        assert!(Arc::ptr_eq(&out.queue, &original));
        assert_eq!(out.rate, 48_000);
    }

    #[test]
    fn converts_to_output_rate() {
        let (ctx, rx) = ctx();
        let mut conv = RateConverter::new(MediaFormat::output_default());

        let Flow::Audio(out) = conv.start(Flow::Audio(audio(44_100, 2, 44_100)), &ctx).unwrap()
        else {
            panic!("converter should yield audio");
        };
        assert_eq!(out.rate, 48_000);

        let mut frames = 0;
        while let Some(chunk) = out.queue.pop_up_to(4096) {
            frames += chunk.len() / 2;
        }
        conv.wait_for_stop();
        assert!((46_000..=50_000).contains(&frames), "got {frames} frames");
        assert!(rx.try_receive().is_none());
    }

    #[test]
    fn rejects_byte_input() {
        let (ctx, _rx) = ctx();
        let mut conv = RateConverter::new(MediaFormat::output_default());
        assert!(conv.start(Flow::Empty, &ctx).is_err());
    }
}
