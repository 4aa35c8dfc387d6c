//! Bounded hand-off queue between audio stages.
//!
//! Samples travel interleaved as `f32`:
//! - decoder worker → queue → resampler worker
//! - resampler worker → queue → output callback
//!
//! `close()` marks the producer side finished; consumers drain what is left and then
//! see `None`. `clear()` drops buffered audio without closing, which is how a stage
//! resets its buffers between tracks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Fallback buffer length when the configured one is unusable.
const FALLBACK_BUFFER_SECONDS: f32 = 2.0;

/// Queue capacity in samples for `seconds` of audio at `rate_hz` with `channels`.
///
/// Non-finite or non-positive `seconds` fall back to two seconds.
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        FALLBACK_BUFFER_SECONDS
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels.max(1))
}

struct Buffered {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Thread-safe bounded queue of interleaved samples with a fixed channel count.
pub struct AudioQueue {
    channels: usize,
    capacity: usize,
    state: Mutex<Buffered>,
    changed: Condvar,
}

impl AudioQueue {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity: capacity_samples.max(channels),
            state: Mutex::new(Buffered {
                samples: VecDeque::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffered> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity / self.channels
    }

    /// Buffered frames right now; stale as soon as it returns.
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the producer side finished and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Drop all buffered samples, keeping the queue open.
    pub fn clear(&self) {
        self.lock().samples.clear();
        self.changed.notify_all();
    }

    /// Append samples, waiting for room when full.
    ///
    /// Returns `false` if the queue was closed before everything was accepted; the
    /// remainder is dropped.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut rest = samples;
        while !rest.is_empty() {
            let mut g = self.lock();
            while g.samples.len() >= self.capacity && !g.closed {
                g = self.changed.wait(g).unwrap_or_else(|e| e.into_inner());
            }
            if g.closed {
                return false;
            }
            let room = self.capacity - g.samples.len();
            let take = room.min(rest.len());
            g.samples.extend(&rest[..take]);
            rest = &rest[take..];
            drop(g);
            self.changed.notify_all();
        }
        true
    }

    /// Wait for exactly `frames` frames. `None` if closed before that many arrive.
    pub fn pop_exact(&self, frames: usize) -> Option<Vec<f32>> {
        let want = frames * self.channels;
        let mut g = self.lock();
        while g.samples.len() < want && !g.closed {
            g = self.changed.wait(g).unwrap_or_else(|e| e.into_inner());
        }
        if g.samples.len() < want {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..want).collect();
        drop(g);
        self.changed.notify_all();
        Some(out)
    }

    /// Wait for at least one frame, then take up to `max_frames`.
    ///
    /// `None` once the queue is closed and holds less than a full frame.
    pub fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        while g.samples.len() < self.channels && !g.closed {
            g = self.changed.wait(g).unwrap_or_else(|e| e.into_inner());
        }
        let take = (g.samples.len() / self.channels).min(max_frames) * self.channels;
        if take == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take).collect();
        drop(g);
        self.changed.notify_all();
        Some(out)
    }

    /// Take up to `max_frames` without waiting; `None` when nothing is buffered.
    ///
    /// Used from the real-time output callback.
    pub fn try_pop(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take = (g.samples.len() / self.channels).min(max_frames) * self.channels;
        if take == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take).collect();
        drop(g);
        self.changed.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and drained, or `cancel` is raised.
    ///
    /// Returns `true` on a normal drain, `false` when cancelled.
    pub fn wait_drained(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.closed && g.samples.is_empty() {
                return true;
            }
            let (next, _timeout) = self
                .changed
                .wait_timeout(g, Duration::from_millis(50))
                .unwrap_or_else(|e| e.into_inner());
            g = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn capacity_for_falls_back_on_bad_seconds() {
        assert_eq!(capacity_for(48_000, 2, 2.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, 0.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, f32::NAN), 192_000);
        assert_eq!(capacity_for(48_000, 2, f32::INFINITY), 192_000);
        assert_eq!(capacity_for(44_100, 1, 0.5), 22_050);
    }

    #[test]
    fn try_pop_empty_returns_none() {
        let q = AudioQueue::new(2, 16);
        assert!(q.try_pop(4).is_none());
    }

    #[test]
    fn try_pop_returns_whole_frames_only() {
        let q = AudioQueue::new(2, 64);
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(q.try_pop(8).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(q.try_pop(8).is_none());
    }

    #[test]
    fn pop_exact_waits_for_enough_frames() {
        let q = Arc::new(AudioQueue::new(2, 64));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop_exact(3))
        };
        q.push_blocking(&[0.1, 0.2, 0.3, 0.4]);
        q.push_blocking(&[0.5, 0.6]);
        assert_eq!(consumer.join().unwrap().unwrap().len(), 6);
    }

    #[test]
    fn pop_exact_returns_none_when_closed_short() {
        let q = AudioQueue::new(2, 64);
        q.push_blocking(&[1.0, 2.0]);
        q.close();
        assert!(q.pop_exact(2).is_none());
    }

    #[test]
    fn pop_up_to_drains_tail_after_close() {
        let q = AudioQueue::new(2, 64);
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0]);
        q.close();
        assert_eq!(q.pop_up_to(8).unwrap().len(), 4);
        assert!(q.pop_up_to(8).is_none());
    }

    #[test]
    fn push_blocking_stops_when_closed() {
        let q = Arc::new(AudioQueue::new(1, 2));
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push_blocking(&[1.0, 2.0, 3.0, 4.0]))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(!producer.join().unwrap());
        assert_eq!(q.len_frames(), 2);
    }

    #[test]
    fn clear_drops_buffered_audio_and_unblocks_producer() {
        let q = Arc::new(AudioQueue::new(1, 2));
        q.push_blocking(&[1.0, 2.0]);
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push_blocking(&[3.0]))
        };
        thread::sleep(Duration::from_millis(20));
        q.clear();
        assert!(producer.join().unwrap());
        assert!(!q.is_closed());
        assert_eq!(q.try_pop(4).unwrap(), vec![3.0]);
    }

    #[test]
    fn wait_drained_returns_true_after_close_and_drain() {
        let q = AudioQueue::new(2, 64);
        let cancel = AtomicBool::new(false);
        q.close();
        assert!(q.wait_drained(&cancel));
    }

    #[test]
    fn wait_drained_respects_cancel() {
        let q = AudioQueue::new(2, 64);
        q.push_blocking(&[1.0, 2.0]);
        let cancel = AtomicBool::new(true);
        assert!(!q.wait_drained(&cancel));
    }
}
