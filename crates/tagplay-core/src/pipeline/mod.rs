//! In-process stage graph: registry + linked chain + the current run.
//!
//! A run starts every linked stage in chain order, handing each stage's output
//! [`Flow`] to the next:
//! - reader opens the source and yields encoded bytes
//! - decoder detects their format and yields a decoded audio queue
//! - converter resamples into the output rate
//! - writer plays the queue and reports how the run ended

use std::path::Path;

use crate::chain::Chain;
use crate::command::{CommandSender, RunId};
use crate::config::PlaybackConfig;
use crate::graph::{GraphError, StageGraph};
use crate::registry::StageRegistry;
use crate::stage::{Direction, Flow, RunContext, Stage, StageClass};

pub struct Pipeline {
    registry: StageRegistry,
    chain: Option<Chain>,
    events: CommandSender,
    playback: PlaybackConfig,
    current: Option<RunContext>,
}

impl Pipeline {
    /// `events` receives the status reports of every run.
    pub fn new(events: CommandSender, playback: PlaybackConfig) -> Self {
        Self {
            registry: StageRegistry::new(),
            chain: None,
            events,
            playback,
            current: None,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn linked(&self) -> Option<&Chain> {
        self.chain.as_ref()
    }

    /// Control handle of the run in progress, if any.
    pub fn current_run(&self) -> Option<&RunContext> {
        self.current.as_ref()
    }

    fn require_chain(&self) -> Result<Chain, GraphError> {
        self.chain.clone().ok_or(GraphError::NotLinked)
    }

    /// Check that the chain's stages are registered and in a usable order.
    fn validate(&self, chain: &Chain) -> Result<(), GraphError> {
        let last = chain.len() - 1;
        for (position, name) in chain.stages().iter().enumerate() {
            let desc = self
                .registry
                .descriptor(name)
                .ok_or_else(|| crate::registry::RegistryError::UnknownStage(name.clone()))?;
            let expected = match position {
                0 if desc.class != StageClass::Reader => Some("reader"),
                crate::chain::DECODER_SLOT if !matches!(desc.class, StageClass::Decoder(_)) => {
                    Some("decoder")
                }
                p if p == last && desc.class != StageClass::Writer => Some("writer"),
                p if p != 0 && p != last && desc.direction != Direction::Transform => {
                    Some("transform")
                }
                _ => None,
            };
            if let Some(expected) = expected {
                return Err(GraphError::WrongClass {
                    position,
                    stage: name.clone(),
                    expected,
                });
            }
        }
        Ok(())
    }

    fn for_each_linked(&mut self, mut f: impl FnMut(&mut dyn Stage)) {
        let Some(chain) = self.chain.as_ref() else {
            return;
        };
        for name in chain.stages() {
            if let Some(stage) = self.registry.get_mut(name) {
                f(stage);
            }
        }
    }
}

impl StageGraph for Pipeline {
    fn register(&mut self, stage: Box<dyn Stage>) -> Result<(), GraphError> {
        tracing::debug!(stage = stage.name(), "stage registered");
        Ok(self.registry.register(stage)?)
    }

    fn unregister(&mut self, name: &str) -> Result<Box<dyn Stage>, GraphError> {
        if self.chain.as_ref().is_some_and(|c| c.contains(name)) {
            tracing::debug!(stage = name, "unregistering a linked stage; chain dropped");
            self.chain = None;
        }
        Ok(self.registry.unregister(name)?)
    }

    fn registered(&self) -> Vec<String> {
        self.registry.names()
    }

    fn relink(&mut self, chain: &Chain) -> Result<(), GraphError> {
        self.validate(chain)?;
        tracing::debug!(chain = ?chain.stages(), "relinked");
        self.chain = Some(chain.clone());
        Ok(())
    }

    fn breakup(&mut self, name: &str) -> Result<(), GraphError> {
        let stage = self.registry.require_mut(name)?;
        stage.stop();
        stage.wait_for_stop();
        if self.chain.as_ref().is_some_and(|c| c.contains(name)) {
            tracing::debug!(stage = name, "stage broken out of chain");
            self.chain = None;
        }
        Ok(())
    }

    fn set_source(&mut self, uri: &Path) -> Result<(), GraphError> {
        let chain = self.require_chain()?;
        let reader = chain.reader();
        self.registry
            .require_mut(reader)?
            .set_uri(uri)
            .map_err(|e| GraphError::Source {
                stage: reader.to_string(),
                reason: format!("{e:#}"),
            })
    }

    fn run(&mut self, run: RunId) -> Result<(), GraphError> {
        let chain = self.require_chain()?;
        let ctx = RunContext::new(run, self.events.clone(), self.playback.clone());

        let mut flow = Flow::Empty;
        for (i, name) in chain.stages().iter().enumerate() {
            let stage = self.registry.require_mut(name)?;
            match stage.start(flow, &ctx) {
                Ok(next) => flow = next,
                Err(e) => {
                    ctx.cancel();
                    for started in chain.stages()[..i].iter().rev() {
                        if let Some(s) = self.registry.get_mut(started) {
                            s.stop();
                            s.wait_for_stop();
                        }
                    }
                    return Err(GraphError::StageStart {
                        stage: name.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        tracing::info!(run = %run, decoder = chain.decoder(), "run started");
        self.current = Some(ctx);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), GraphError> {
        if let Some(ctx) = &self.current {
            ctx.set_paused(true);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), GraphError> {
        if let Some(ctx) = &self.current {
            ctx.set_paused(false);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GraphError> {
        if let Some(ctx) = &self.current {
            ctx.cancel();
        }
        self.for_each_linked(|s| s.stop());
        Ok(())
    }

    fn wait_for_stop(&mut self) -> Result<(), GraphError> {
        self.for_each_linked(|s| s.wait_for_stop());
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), GraphError> {
        for name in self.registry.names() {
            if let Some(stage) = self.registry.get_mut(&name) {
                stage.terminate();
            }
        }
        self.current = None;
        Ok(())
    }

    fn reset_buffers(&mut self) -> Result<(), GraphError> {
        self.for_each_linked(|s| s.reset_buffers());
        Ok(())
    }

    fn reset_stage_state(&mut self) -> Result<(), GraphError> {
        self.for_each_linked(|s| s.reset_state());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;
    use crate::decoder_kind::DecoderKind;
    use crate::registry::RegistryError;
    use crate::registry::tests::FakeStage;
    use crate::stage::{CONVERTER, READER, WRITER};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn pipeline() -> (Pipeline, Log, command::CommandReceiver) {
        let (tx, rx) = command::channel();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut p = Pipeline::new(tx, PlaybackConfig::default());
        let stages = [
            (READER, StageClass::Reader),
            ("mp3_decoder", StageClass::Decoder(DecoderKind::Mp3)),
            ("wav_decoder", StageClass::Decoder(DecoderKind::Wav)),
            (CONVERTER, StageClass::Converter),
            (WRITER, StageClass::Writer),
        ];
        for (name, class) in stages {
            p.register(Box::new(FakeStage::new(name, class, log.clone())))
                .unwrap();
        }
        (p, log, rx)
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn relink_validates_registration_and_roles() {
        let (mut p, _log, _rx) = pipeline();

        let unknown = Chain::standard(DecoderKind::Aac);
        assert!(matches!(
            p.relink(&unknown),
            Err(GraphError::Registry(RegistryError::UnknownStage(name))) if name == "aac_decoder"
        ));

        let swapped = Chain::new([WRITER, "mp3_decoder", READER]).unwrap();
        assert!(matches!(
            p.relink(&swapped),
            Err(GraphError::WrongClass { position: 0, .. })
        ));

        let no_decoder = Chain::new([READER, CONVERTER, WRITER]).unwrap();
        assert!(matches!(
            p.relink(&no_decoder),
            Err(GraphError::WrongClass { expected: "decoder", .. })
        ));

        assert!(p.linked().is_none());
        p.relink(&Chain::standard(DecoderKind::Mp3)).unwrap();
        assert_eq!(p.linked().unwrap().decoder(), "mp3_decoder");
    }

    #[test]
    fn run_starts_linked_stages_in_chain_order() {
        let (mut p, log, _rx) = pipeline();
        p.relink(&Chain::standard(DecoderKind::Wav)).unwrap();
        p.set_source(&PathBuf::from("/music/b.wav")).unwrap();
        p.run(RunId(1)).unwrap();

        assert_eq!(
            take(&log),
            vec![
                "set_uri:file_reader:/music/b.wav",
                "start(empty):file_reader",
                "start(empty):wav_decoder",
                "start(empty):resampler",
                "start(empty):output_writer",
            ]
        );
        assert_eq!(p.current_run().unwrap().run(), RunId(1));
    }

    #[test]
    fn run_without_chain_is_an_error() {
        let (mut p, _log, _rx) = pipeline();
        assert!(matches!(p.run(RunId(1)), Err(GraphError::NotLinked)));
        assert!(matches!(
            p.set_source(Path::new("a.mp3")),
            Err(GraphError::NotLinked)
        ));
    }

    #[test]
    fn failed_start_stops_already_started_stages() {
        let (tx, _rx) = command::channel();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut p = Pipeline::new(tx, PlaybackConfig::default());
        p.register(Box::new(FakeStage::new(READER, StageClass::Reader, log.clone())))
            .unwrap();
        let mut bad = FakeStage::new(
            "mp3_decoder",
            StageClass::Decoder(DecoderKind::Mp3),
            log.clone(),
        );
        bad.fail_start = true;
        p.register(Box::new(bad)).unwrap();
        p.register(Box::new(FakeStage::new(WRITER, StageClass::Writer, log.clone())))
            .unwrap();
        p.relink(&Chain::new([READER, "mp3_decoder", WRITER]).unwrap())
            .unwrap();

        let err = p.run(RunId(3)).unwrap_err();
        assert!(matches!(err, GraphError::StageStart { ref stage, .. } if stage == "mp3_decoder"));
        assert_eq!(
            take(&log),
            vec![
                "start(empty):file_reader",
                "start(empty):mp3_decoder",
                "stop:file_reader",
                "wait:file_reader",
            ]
        );
        assert!(p.current_run().is_none());
    }

    #[test]
    fn pause_and_resume_toggle_the_run_flag() {
        let (mut p, _log, _rx) = pipeline();
        p.relink(&Chain::standard(DecoderKind::Mp3)).unwrap();
        p.run(RunId(1)).unwrap();

        p.pause().unwrap();
        assert!(p.current_run().unwrap().is_paused());
        p.resume().unwrap();
        assert!(!p.current_run().unwrap().is_paused());
    }

    #[test]
    fn stop_cancels_run_and_only_touches_linked_stages() {
        let (mut p, log, _rx) = pipeline();
        p.relink(&Chain::standard(DecoderKind::Mp3)).unwrap();
        p.run(RunId(1)).unwrap();
        take(&log);

        p.stop().unwrap();
        p.wait_for_stop().unwrap();

        assert!(p.current_run().unwrap().is_cancelled());
        let log = take(&log);
        assert!(!log.iter().any(|e| e.ends_with(":wav_decoder")));
        assert_eq!(
            log,
            vec![
                "stop:file_reader",
                "stop:mp3_decoder",
                "stop:resampler",
                "stop:output_writer",
                "wait:file_reader",
                "wait:mp3_decoder",
                "wait:resampler",
                "wait:output_writer",
            ]
        );
    }

    #[test]
    fn breakup_drops_chain_but_keeps_stage_registered() {
        let (mut p, log, _rx) = pipeline();
        p.relink(&Chain::standard(DecoderKind::Mp3)).unwrap();
        take(&log);

        p.breakup("mp3_decoder").unwrap();
        assert!(p.linked().is_none());
        assert!(p.registered().contains(&"mp3_decoder".to_string()));
        assert_eq!(take(&log), vec!["stop:mp3_decoder", "wait:mp3_decoder"]);

        p.breakup("wav_decoder").unwrap();
        assert!(p.breakup("flac_decoder").is_err());
    }

    #[test]
    fn teardown_releases_every_stage() {
        let (mut p, log, _rx) = pipeline();
        p.relink(&Chain::standard(DecoderKind::Mp3)).unwrap();
        p.run(RunId(1)).unwrap();
        take(&log);

        p.teardown().unwrap();

        assert!(p.registered().is_empty());
        assert!(p.linked().is_none());
        assert!(p.current_run().is_none());
        let log = take(&log);
        let released: Vec<_> = log.iter().filter(|e| e.starts_with("release:")).collect();
        assert_eq!(released.len(), 5);
        let first_release = log.iter().position(|e| e.starts_with("release:")).unwrap();
        let last_terminate = log.iter().rposition(|e| e.starts_with("terminate:")).unwrap();
        assert!(last_terminate < first_release);
    }

    #[test]
    fn reset_calls_reach_linked_stages() {
        let (mut p, log, _rx) = pipeline();
        p.relink(&Chain::standard(DecoderKind::Wav)).unwrap();
        p.reset_buffers().unwrap();
        p.reset_stage_state().unwrap();
        let log = take(&log);
        assert!(log.contains(&"reset_buffers:wav_decoder".to_string()));
        assert!(log.contains(&"reset_state:output_writer".to_string()));
        assert!(!log.contains(&"reset_buffers:mp3_decoder".to_string()));
    }
}
