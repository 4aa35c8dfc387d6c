//! Runtime interface of the stage graph.
//!
//! The controller and the chain linker only ever talk to the graph through
//! [`StageGraph`]; [`crate::pipeline::Pipeline`] is the in-process implementation.

use std::path::Path;

use crate::chain::{Chain, ChainError};
use crate::command::RunId;
use crate::registry::RegistryError;
use crate::stage::Stage;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("stage {stage:?} at position {position} is not a {expected}")]
    WrongClass {
        position: usize,
        stage: String,
        expected: &'static str,
    },
    #[error("no chain is linked")]
    NotLinked,
    #[error("stage {stage} failed to start: {reason}")]
    StageStart { stage: String, reason: String },
    #[error("stage {stage} rejected source: {reason}")]
    Source { stage: String, reason: String },
}

/// Operations the playback core needs from the stage graph runtime.
pub trait StageGraph {
    fn register(&mut self, stage: Box<dyn Stage>) -> Result<(), GraphError>;

    /// Remove a stage, returning ownership so the caller can release it.
    fn unregister(&mut self, name: &str) -> Result<Box<dyn Stage>, GraphError>;

    /// Registered stage names in registration order.
    fn registered(&self) -> Vec<String>;

    /// Replace the linked chain. Every name must be registered.
    fn relink(&mut self, chain: &Chain) -> Result<(), GraphError>;

    /// Detach `name` from the linked chain, leaving it registered.
    fn breakup(&mut self, name: &str) -> Result<(), GraphError>;

    /// Point the chain's reader at `uri`.
    fn set_source(&mut self, uri: &Path) -> Result<(), GraphError>;

    /// Start the linked chain; status events are tagged with `run`.
    fn run(&mut self, run: RunId) -> Result<(), GraphError>;

    fn pause(&mut self) -> Result<(), GraphError>;

    fn resume(&mut self) -> Result<(), GraphError>;

    /// Ask the current run to stop. Does not block.
    fn stop(&mut self) -> Result<(), GraphError>;

    /// Block until the current run's workers have exited.
    fn wait_for_stop(&mut self) -> Result<(), GraphError>;

    /// Drop per-run state of every registered stage.
    fn terminate(&mut self) -> Result<(), GraphError>;

    fn reset_buffers(&mut self) -> Result<(), GraphError>;

    fn reset_stage_state(&mut self) -> Result<(), GraphError>;

    /// Stop, wait, terminate, unregister every stage, then release them all.
    ///
    /// Returns the released names in order. Keeps going past individual failures and
    /// returns the first one.
    fn teardown(&mut self) -> Result<Vec<String>, GraphError> {
        let mut released = Vec::new();
        let mut first: Option<GraphError> = None;
        let mut keep = |res: Result<(), GraphError>, step: &str| {
            if let Err(e) = res {
                tracing::warn!(step, "teardown: {e}");
                first.get_or_insert(e);
            }
        };
        keep(self.stop(), "stop");
        keep(self.wait_for_stop(), "wait_for_stop");
        keep(self.terminate(), "terminate");
        let mut unregistered = Vec::new();
        for name in self.registered() {
            match self.unregister(&name) {
                Ok(stage) => unregistered.push((name, stage)),
                Err(e) => keep(Err(e), "unregister"),
            }
        }
        for (name, stage) in unregistered {
            stage.release();
            released.push(name);
        }
        match first {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }
}
