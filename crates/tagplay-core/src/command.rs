//! Command channel into the playback controller.
//!
//! Every change to controller state enters through this queue:
//! - control commands from callers (sensor loop, CLI)
//! - status events reported by stage workers
//!
//! Multi-producer, single-consumer, strictly FIFO. Sending never blocks.

use std::fmt;
use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

/// Generation number of one chain run.
///
/// Stage workers tag their status events with the run they belong to so the
/// controller can drop reports from a run it already replaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl RunId {
    pub fn next(self) -> Self {
        RunId(self.0.saturating_add(1))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a `Start` command asks to play.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartRef {
    /// A single file, played directly.
    Track(PathBuf),
    /// A playlist identity; the track is the playlist's current entry.
    Playlist(String),
}

impl fmt::Display for StartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartRef::Track(path) => write!(f, "track {}", path.display()),
            StartRef::Playlist(id) => write!(f, "playlist {id}"),
        }
    }
}

/// Status reported by the stage graph for a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageStatus {
    /// The run ended early (source interrupted); buffers need no flush.
    Stopped,
    /// The track played to its natural end.
    Finished,
    /// A stage worker failed; the run cannot continue.
    Failed { stage: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub run: RunId,
    pub status: StageStatus,
}

/// Commands and events consumed by the controller loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start(StartRef),
    Pause,
    Resume,
    Stop,
    StageStatus(StatusEvent),
    /// Tear the stage graph down and leave the control loop.
    Shutdown,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("command channel closed")]
    Closed,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Producer side; clone freely across threads.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Enqueue `cmd` without blocking. Ownership of any payload moves into the queue.
    pub fn send(&self, cmd: Command) -> Result<(), ChannelError> {
        self.tx.send(cmd).map_err(|_| ChannelError::Closed)
    }

    pub fn start(&self, what: StartRef) -> Result<(), ChannelError> {
        self.send(Command::Start(what))
    }

    pub fn pause(&self) -> Result<(), ChannelError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), ChannelError> {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> Result<(), ChannelError> {
        self.send(Command::Stop)
    }

    pub fn shutdown(&self) -> Result<(), ChannelError> {
        self.send(Command::Shutdown)
    }

    /// Report a stage status for `run`.
    pub fn report(&self, run: RunId, status: StageStatus) -> Result<(), ChannelError> {
        self.send(Command::StageStatus(StatusEvent { run, status }))
    }
}

/// Consumer side; owned by the controller loop only.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: Receiver<Command>,
}

impl CommandReceiver {
    /// Block until the next command is available.
    pub fn receive(&self) -> Result<Command, ChannelError> {
        self.rx.recv().map_err(|_| ChannelError::Closed)
    }

    /// Return the next command if one is already queued.
    pub fn try_receive(&self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}
