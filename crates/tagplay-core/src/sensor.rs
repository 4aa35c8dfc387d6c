//! Tag sensor seam and the dispatcher that turns presence events into commands.
//!
//! The sensor owns polling cadence and debounce; the controller only ever sees the
//! resulting commands on its channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::command::{ChannelError, CommandSender, StartRef};

/// Default delay between two sensor polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one sensor poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagEvent {
    /// A tag was presented.
    NewTag(u64),
    /// The tag was removed.
    TagLost(u64),
    NoChange,
}

/// Presence sensor for physical tags.
pub trait TagSensor {
    /// Poll once. Must not block for longer than one poll interval.
    fn sense(&mut self) -> TagEvent;
}

/// Maps tag events onto controller commands.
#[derive(Debug)]
pub struct TagDispatcher {
    tx: CommandSender,
    last: Option<u64>,
}

impl TagDispatcher {
    pub fn new(tx: CommandSender) -> Self {
        Self { tx, last: None }
    }

    /// Tag id most recently dispatched as a `Start`.
    pub fn last_tag(&self) -> Option<u64> {
        self.last
    }

    /// Send the commands for `event`.
    ///
    /// A new tag stops the current track and starts the tag's playlist; the same tag
    /// presented again resumes; removal pauses.
    pub fn dispatch(&mut self, event: TagEvent) -> Result<(), ChannelError> {
        match event {
            TagEvent::NewTag(id) if self.last == Some(id) => {
                tracing::debug!(tag = id, "tag presented again");
                self.tx.resume()
            }
            TagEvent::NewTag(id) => {
                tracing::info!(tag = id, "new tag");
                self.last = Some(id);
                self.tx.stop()?;
                self.tx.start(StartRef::Playlist(id.to_string()))
            }
            TagEvent::TagLost(id) => {
                tracing::info!(tag = id, "tag removed");
                self.tx.pause()
            }
            TagEvent::NoChange => Ok(()),
        }
    }
}

/// Poll `sensor` every `interval` and dispatch its events until `stop` is raised or the
/// command channel closes.
pub fn run_sensor_loop<S: TagSensor + ?Sized>(
    sensor: &mut S,
    mut dispatcher: TagDispatcher,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "sensor loop started");
    while !stop.load(Ordering::Relaxed) {
        let event = sensor.sense();
        if let Err(e) = dispatcher.dispatch(event) {
            tracing::info!("sensor loop ending: {e}");
            return;
        }
        thread::sleep(interval);
    }
    tracing::info!("sensor loop stopped");
}
