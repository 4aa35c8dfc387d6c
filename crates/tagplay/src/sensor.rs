//! Line-oriented tag sensor.
//!
//! A reader thread parses one tag id per line (decimal, or hex with a `0x` prefix) from
//! stdin, a file, or a FIFO fed by the RFID reader. Polling turns those reads into
//! presence events: repeated ids are suppressed while the tag stays present, and a
//! tag that stops being read for the quiet interval counts as removed.

use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use tagplay_core::sensor::{TagEvent, TagSensor};

pub struct LineTagSensor {
    rx: Receiver<u64>,
    quiet: Option<Duration>,
    present: Option<u64>,
    last_seen: Instant,
}

impl LineTagSensor {
    /// Read ids from `reader` on a background thread.
    ///
    /// `quiet` is the silence after which the present tag is reported lost; `None`
    /// keeps a tag present until a different one is read.
    pub fn spawn<R>(reader: R, quiet: Option<Duration>) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("tag-reader".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!("tag read failed: {e}");
                            break;
                        }
                    };
                    let Some(id) = parse_tag_id(&line) else {
                        if !line.trim().is_empty() {
                            tracing::warn!(line = %line.trim(), "ignoring malformed tag id");
                        }
                        continue;
                    };
                    if tx.send(id).is_err() {
                        break;
                    }
                }
                tracing::info!("tag source closed");
            })
            .context("spawn tag reader thread")?;
        Ok(Self::from_receiver(rx, quiet))
    }

    fn from_receiver(rx: Receiver<u64>, quiet: Option<Duration>) -> Self {
        Self {
            rx,
            quiet,
            present: None,
            last_seen: Instant::now(),
        }
    }

    fn sense_at(&mut self, now: Instant) -> TagEvent {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(id) => newest = Some(id),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        if let Some(id) = newest {
            self.last_seen = now;
            if self.present == Some(id) {
                return TagEvent::NoChange;
            }
            self.present = Some(id);
            return TagEvent::NewTag(id);
        }

        match (self.present, self.quiet) {
            (Some(id), Some(quiet)) if now.duration_since(self.last_seen) >= quiet => {
                self.present = None;
                TagEvent::TagLost(id)
            }
            _ => TagEvent::NoChange,
        }
    }
}

impl TagSensor for LineTagSensor {
    fn sense(&mut self) -> TagEvent {
        self.sense_at(Instant::now())
    }
}

/// Parse a decimal or `0x`-prefixed hex tag id.
pub fn parse_tag_id(line: &str) -> Option<u64> {
    let s = line.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
