//! Playback controller: the single consumer of the command channel.
//!
//! Owns the stage graph, the chain linker and the playlist handle, and moves between
//! `Idle`, `Playing` and `Paused` in response to control commands and stage status
//! events. Nothing else mutates controller state.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::Result;

use crate::chain::{Chain, ChainLinker, LinkError};
use crate::command::{
    ChannelError, Command, CommandReceiver, CommandSender, RunId, StageStatus, StartRef,
    StatusEvent,
};
use crate::decoder_kind::DecoderKind;
use crate::graph::StageGraph;
use crate::playlist::PlaylistManager;
use crate::status::{PlaybackEndReason, PlayerState, PlayerStatusState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Direct,
    Playlist,
}

#[derive(Clone, Debug)]
struct ActiveTrack {
    path: PathBuf,
    origin: Origin,
}

pub struct PlaybackController<G: StageGraph> {
    graph: G,
    linker: ChainLinker,
    playlist: PlaylistManager,
    rx: CommandReceiver,
    status: Arc<Mutex<PlayerStatusState>>,
    state: PlayerState,
    active: Option<ActiveTrack>,
    run: RunId,
    /// End-of-track report received while paused.
    parked: Option<StageStatus>,
}

impl<G: StageGraph> PlaybackController<G> {
    /// Build the controller and link `initial` into `graph`.
    pub fn new(
        mut graph: G,
        initial: Chain,
        playlist: PlaylistManager,
        rx: CommandReceiver,
        status: Arc<Mutex<PlayerStatusState>>,
    ) -> Result<Self, LinkError> {
        let mut linker = ChainLinker::new(initial);
        linker.link_initial(&mut graph)?;
        Ok(Self {
            graph,
            linker,
            playlist,
            rx,
            status,
            state: PlayerState::Idle,
            active: None,
            run: RunId::default(),
            parked: None,
        })
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn chain(&self) -> &Chain {
        self.linker.chain()
    }

    pub fn active_track(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn current_run(&self) -> RunId {
        self.run
    }

    /// Consume commands until `Shutdown`, or until every sender is gone.
    pub fn run_loop(mut self) {
        tracing::info!("controller loop started");
        loop {
            match self.rx.receive() {
                Ok(cmd) => {
                    if self.handle(cmd).is_break() {
                        break;
                    }
                }
                Err(ChannelError::Closed) => {
                    // No sender is left to deliver a Shutdown.
                    tracing::warn!("command channel closed; shutting down");
                    self.on_shutdown();
                    break;
                }
            }
        }
        tracing::info!("controller loop exited");
    }

    /// Apply one command. `Break` after `Shutdown`.
    pub fn handle(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Start(what) => self.on_start(what),
            Command::Pause => self.on_pause(),
            Command::Resume => self.on_resume(),
            Command::Stop => self.on_stop(),
            Command::StageStatus(ev) => self.on_stage_status(ev),
            Command::Shutdown => {
                self.on_shutdown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_start(&mut self, what: StartRef) {
        let Some((track, origin)) = self.resolve(&what) else {
            tracing::warn!(start = %what, state = ?self.state, "nothing to play");
            return;
        };

        if let Some(active) = self.active.as_mut()
            && active.path == track
        {
            active.origin = origin;
            match self.state {
                PlayerState::Playing => {
                    tracing::debug!(track = %track.display(), "already playing");
                    return;
                }
                PlayerState::Paused => {
                    self.resume_run();
                    return;
                }
                PlayerState::Idle => {}
            }
        }

        if self.state != PlayerState::Idle {
            self.halt_run();
            warn_on(self.graph.reset_buffers(), "reset_buffers");
        }
        self.parked = None;
        self.play(track, origin);
    }

    fn on_pause(&mut self) {
        if self.state != PlayerState::Playing {
            tracing::debug!(state = ?self.state, "pause ignored");
            return;
        }
        warn_on(self.graph.pause(), "pause");
        self.set_state(PlayerState::Paused);
        tracing::info!(run = %self.run, "paused");
    }

    fn on_resume(&mut self) {
        if self.state != PlayerState::Paused {
            tracing::debug!(state = ?self.state, "resume ignored");
            return;
        }
        self.resume_run();
    }

    fn on_stop(&mut self) {
        if self.state != PlayerState::Playing {
            tracing::debug!(state = ?self.state, "stop ignored");
            return;
        }
        warn_on(self.graph.pause(), "pause");
        self.set_state(PlayerState::Paused);
        tracing::info!(run = %self.run, "stopped; chain kept linked");
    }

    fn on_stage_status(&mut self, ev: StatusEvent) {
        if ev.run != self.run {
            tracing::debug!(
                run = %ev.run,
                current = %self.run,
                status = ?ev.status,
                "stale status ignored"
            );
            return;
        }
        if self.state == PlayerState::Idle {
            tracing::debug!(run = %ev.run, status = ?ev.status, "status while idle ignored");
            return;
        }
        match ev.status {
            StageStatus::Failed { stage, reason } => {
                self.abort(format!("{stage}: {reason}"));
            }
            status if self.state == PlayerState::Paused => {
                tracing::info!(run = %ev.run, status = ?status, "end of track parked until resume");
                self.parked = Some(status);
            }
            status => self.track_ended(status),
        }
    }

    fn on_shutdown(&mut self) {
        tracing::info!("shutting down stage graph");
        match self.graph.teardown() {
            Ok(released) => tracing::info!(stages = ?released, "stages released"),
            Err(e) => tracing::warn!("teardown incomplete: {e}"),
        }
        self.active = None;
        self.parked = None;
        self.publish(|s| s.clear_playback(PlaybackEndReason::Stopped));
        self.state = PlayerState::Idle;
    }

    fn resume_run(&mut self) {
        warn_on(self.graph.resume(), "resume");
        self.set_state(PlayerState::Playing);
        tracing::info!(run = %self.run, "resumed");
        if let Some(status) = self.parked.take() {
            self.track_ended(status);
        }
    }

    /// Move on after the current run ended, or go idle if there is no successor.
    fn track_ended(&mut self, status: StageStatus) {
        let reason = if status == StageStatus::Finished {
            self.halt_run();
            warn_on(self.graph.reset_buffers(), "reset_buffers");
            warn_on(self.graph.reset_stage_state(), "reset_stage_state");
            PlaybackEndReason::Eof
        } else {
            PlaybackEndReason::Stopped
        };
        self.publish(|s| s.end_reason = Some(reason));

        let next = match self.active.as_ref().map(|a| a.origin) {
            Some(Origin::Playlist) => {
                self.playlist.advance();
                self.playlist.current()
            }
            _ => None,
        };
        match next {
            Some(track) => self.play(track, Origin::Playlist),
            None => {
                tracing::info!(reason = ?reason, "nothing left to play");
                self.active = None;
                self.state = PlayerState::Idle;
                self.publish(|s| s.clear_playback(reason));
            }
        }
    }

    fn resolve(&mut self, what: &StartRef) -> Option<(PathBuf, Origin)> {
        match what {
            StartRef::Track(path) => Some((path.clone(), Origin::Direct)),
            StartRef::Playlist(identity) => {
                let track = self.playlist.switch_to(identity)?;
                self.publish(|s| s.playlist = Some(identity.clone()));
                Some((track, Origin::Playlist))
            }
        }
    }

    /// Select the decoder for `track`, point the reader at it and start a new run.
    fn play(&mut self, track: PathBuf, origin: Origin) {
        let kind = DecoderKind::from_path(&track);
        self.run = self.run.next();
        if let Err(e) = self.launch(&track, kind) {
            self.abort(format!("{e:#}"));
            return;
        }

        tracing::info!(track = %track.display(), decoder = %kind, run = %self.run, "playing");
        let cursor = (origin == Origin::Playlist).then(|| self.playlist.cursor());
        let run = self.run;
        let label = track.display().to_string();
        self.publish(|s| {
            s.started(&label, kind, run);
            s.cursor = cursor;
        });
        self.active = Some(ActiveTrack {
            path: track,
            origin,
        });
        self.state = PlayerState::Playing;
    }

    fn launch(&mut self, track: &Path, kind: DecoderKind) -> Result<()> {
        self.linker.select(kind, &mut self.graph)?;
        self.graph.set_source(track)?;
        self.graph.run(self.run)?;
        Ok(())
    }

    /// Stop the chain, record the failure and go idle.
    fn abort(&mut self, reason: String) {
        tracing::error!(run = %self.run, "playback failed: {reason}");
        self.halt_run();
        self.active = None;
        self.parked = None;
        self.state = PlayerState::Idle;
        self.publish(|s| {
            s.clear_playback(PlaybackEndReason::Error);
            s.last_error = Some(reason);
        });
    }

    fn halt_run(&mut self) {
        warn_on(self.graph.stop(), "stop");
        warn_on(self.graph.wait_for_stop(), "wait_for_stop");
    }

    fn set_state(&mut self, state: PlayerState) {
        self.state = state;
        self.publish(|s| s.state = state);
    }

    fn publish(&self, f: impl FnOnce(&mut PlayerStatusState)) {
        let mut guard = self.status.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

}

fn warn_on<E: std::fmt::Display>(res: Result<(), E>, step: &str) {
    if let Err(e) = res {
        tracing::warn!(step, "graph call failed: {e}");
    }
}

/// Sender plus join handle of a controller running on its own thread.
pub struct ControllerHandle {
    tx: CommandSender,
    join: JoinHandle<()>,
}

impl ControllerHandle {
    pub fn sender(&self) -> CommandSender {
        self.tx.clone()
    }

    /// Wait for the controller loop to exit.
    pub fn join(self) -> thread::Result<()> {
        self.join.join()
    }
}

/// Run `controller` on a dedicated thread.
pub fn spawn_controller<G>(
    controller: PlaybackController<G>,
    tx: CommandSender,
) -> std::io::Result<ControllerHandle>
where
    G: StageGraph + Send + 'static,
{
    let join = thread::Builder::new()
        .name("playback-controller".to_string())
        .spawn(move || controller.run_loop())?;
    Ok(ControllerHandle { tx, join })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;
    use crate::graph::testing::RecordingGraph;
    use crate::playlist::tests::MemoryStore;

    struct Harness {
        ctl: PlaybackController<RecordingGraph>,
        playlist: PlaylistManager,
        status: Arc<Mutex<PlayerStatusState>>,
    }

    impl Harness {
        fn new(store: MemoryStore) -> Self {
            Self::with_graph(store, RecordingGraph::standard())
        }

        fn with_graph(store: MemoryStore, graph: RecordingGraph) -> Self {
            let (_tx, rx) = command::channel();
            let playlist = PlaylistManager::new(Arc::new(store));
            let status = PlayerStatusState::shared();
            let ctl = PlaybackController::new(
                graph,
                Chain::standard(DecoderKind::Mp3),
                playlist.clone(),
                rx,
                status.clone(),
            )
            .unwrap();
            ctl.graph().clear_log();
            Self {
                ctl,
                playlist,
                status,
            }
        }

        fn send(&mut self, cmd: Command) {
            assert!(self.ctl.handle(cmd).is_continue());
        }

        fn start_track(&mut self, path: &str) {
            self.send(Command::Start(StartRef::Track(PathBuf::from(path))));
        }

        fn start_playlist(&mut self, id: &str) {
            self.send(Command::Start(StartRef::Playlist(id.to_string())));
        }

        fn report(&mut self, status: StageStatus) {
            let run = self.ctl.current_run();
            self.send(Command::StageStatus(StatusEvent { run, status }));
        }

        fn take_log(&self) -> Vec<String> {
            let log = self.ctl.graph().log();
            self.ctl.graph().clear_log();
            log
        }
    }

    fn ab_store() -> MemoryStore {
        MemoryStore::default().with("1", &["a.mp3", "b.wav"])
    }

    #[test]
    fn construction_links_initial_chain() {
        let (_tx, rx) = command::channel();
        let graph = RecordingGraph::standard();
        let log = graph.log_handle();
        let ctl = PlaybackController::new(
            graph,
            Chain::standard(DecoderKind::Mp3),
            PlaylistManager::new(Arc::new(MemoryStore::default())),
            rx,
            PlayerStatusState::shared(),
        )
        .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["relink:file_reader,mp3_decoder,resampler,output_writer"]
        );
        assert_eq!(ctl.state(), PlayerState::Idle);
    }

    #[test]
    fn start_track_with_linked_decoder_only_sets_source_and_runs() {
        let mut h = Harness::new(MemoryStore::default());
        h.start_track("y.mp3");

        assert_eq!(h.take_log(), vec!["set_source:y.mp3", "run:1"]);
        assert_eq!(h.ctl.state(), PlayerState::Playing);
        assert_eq!(h.ctl.active_track(), Some(Path::new("y.mp3")));
    }

    #[test]
    fn finished_advances_playlist_with_full_reset() {
        let mut h = Harness::new(ab_store());
        h.start_playlist("1");
        assert_eq!(h.take_log(), vec!["set_source:a.mp3", "run:1"]);

        h.report(StageStatus::Finished);
        assert_eq!(
            h.take_log(),
            vec![
                "stop",
                "wait_for_stop",
                "reset_buffers",
                "reset_stage_state",
                "breakup:mp3_decoder",
                "relink:file_reader,wav_decoder,resampler,output_writer",
                "set_source:b.wav",
                "run:2",
            ]
        );
        assert_eq!(h.playlist.current(), Some(PathBuf::from("b.wav")));
        assert_eq!(h.ctl.state(), PlayerState::Playing);

        h.report(StageStatus::Finished);
        let log = h.take_log();
        assert_eq!(&log[..4], &["stop", "wait_for_stop", "reset_buffers", "reset_stage_state"]);
        assert!(log.contains(&"set_source:a.mp3".to_string()));
        assert_eq!(h.playlist.current(), Some(PathBuf::from("a.mp3")));
        assert_eq!(h.playlist.cursor(), 0);
    }

    #[test]
    fn switching_to_aac_breaks_up_only_the_mp3_decoder() {
        let mut h = Harness::new(MemoryStore::default());
        h.start_track("y.mp3");
        h.take_log();
        let before = h.ctl.graph().registered();

        h.start_track("x.aac");

        let log = h.take_log();
        assert_eq!(
            log,
            vec![
                "stop",
                "wait_for_stop",
                "reset_buffers",
                "breakup:mp3_decoder",
                "relink:file_reader,aac_decoder,resampler,output_writer",
                "set_source:x.aac",
                "run:2",
            ]
        );
        assert_eq!(h.ctl.graph().registered(), before);
        assert!(!log.iter().any(|e| e.starts_with("register") || e.starts_with("unregister")));
        assert!(!log.contains(&"reset_stage_state".to_string()));
        assert!(h.ctl.graph().stage_log().is_empty());
        assert_eq!(h.ctl.chain().reader(), "file_reader");
        assert_eq!(h.ctl.chain().writer(), "output_writer");
    }

    #[test]
    fn pause_then_resume_keeps_chain_and_cursor() {
        let mut h = Harness::new(ab_store());
        h.start_playlist("1");
        h.report(StageStatus::Stopped);
        h.take_log();
        let chain = h.ctl.chain().clone();
        let cursor = h.playlist.cursor();

        h.send(Command::Pause);
        assert_eq!(h.ctl.state(), PlayerState::Paused);
        h.send(Command::Resume);

        assert_eq!(h.take_log(), vec!["pause", "resume"]);
        assert_eq!(h.ctl.chain(), &chain);
        assert_eq!(h.playlist.cursor(), cursor);
        assert_eq!(h.ctl.state(), PlayerState::Playing);
    }

    #[test]
    fn stop_pauses_without_teardown() {
        let mut h = Harness::new(MemoryStore::default());
        h.send(Command::Stop);
        assert_eq!(h.ctl.state(), PlayerState::Idle);
        assert!(h.take_log().is_empty());

        h.start_track("a.mp3");
        h.take_log();
        h.send(Command::Stop);
        assert_eq!(h.ctl.state(), PlayerState::Paused);
        assert_eq!(h.take_log(), vec!["pause"]);

        h.send(Command::Stop);
        assert!(h.take_log().is_empty());
        assert_eq!(h.ctl.graph().registered().len(), 6);
    }

    #[test]
    fn start_of_active_track_resumes_or_is_a_no_op() {
        let mut h = Harness::new(MemoryStore::default());
        h.start_track("a.mp3");
        h.take_log();

        h.start_track("a.mp3");
        assert!(h.take_log().is_empty());

        h.send(Command::Pause);
        h.take_log();
        h.start_track("a.mp3");
        assert_eq!(h.take_log(), vec!["resume"]);
        assert_eq!(h.ctl.state(), PlayerState::Playing);
        assert_eq!(h.ctl.current_run(), RunId(1));
    }

    #[test]
    fn same_tag_restart_keeps_playlist_cursor() {
        let mut h = Harness::new(ab_store());
        h.start_playlist("1");
        h.report(StageStatus::Stopped);
        assert_eq!(h.playlist.cursor(), 1);

        h.send(Command::Pause);
        h.start_playlist("1");
        assert_eq!(h.playlist.cursor(), 1);
        assert_eq!(h.ctl.active_track(), Some(Path::new("b.wav")));
        assert_eq!(h.ctl.state(), PlayerState::Playing);
    }

    #[test]
    fn stopped_event_advances_without_reset() {
        let mut h = Harness::new(ab_store());
        h.start_playlist("1");
        h.take_log();

        h.report(StageStatus::Stopped);

        assert_eq!(
            h.take_log(),
            vec![
                "breakup:mp3_decoder",
                "relink:file_reader,wav_decoder,resampler,output_writer",
                "set_source:b.wav",
                "run:2",
            ]
        );
        assert_eq!(
            h.status.lock().unwrap().end_reason,
            Some(PlaybackEndReason::Stopped)
        );
    }

    #[test]
    fn stale_run_events_are_ignored() {
        let mut h = Harness::new(ab_store());
        h.start_track("a.mp3");
        h.start_playlist("1");
        h.start_track("b.wav");
        h.take_log();
        let cursor = h.playlist.cursor();

        h.send(Command::StageStatus(StatusEvent {
            run: RunId(1),
            status: StageStatus::Finished,
        }));

        assert!(h.take_log().is_empty());
        assert_eq!(h.playlist.cursor(), cursor);
        assert_eq!(h.ctl.active_track(), Some(Path::new("b.wav")));
    }

    #[test]
    fn end_of_track_while_paused_is_applied_on_resume() {
        let mut h = Harness::new(ab_store());
        h.start_playlist("1");
        h.send(Command::Pause);
        h.take_log();

        h.report(StageStatus::Finished);
        assert!(h.take_log().is_empty());
        assert_eq!(h.ctl.state(), PlayerState::Paused);

        h.send(Command::Resume);
        let log = h.take_log();
        assert_eq!(log[0], "resume");
        assert!(log.contains(&"set_source:b.wav".to_string()));
        assert_eq!(h.ctl.state(), PlayerState::Playing);
    }

    #[test]
    fn failure_goes_idle_and_later_start_works() {
        let mut h = Harness::new(MemoryStore::default());
        h.start_track("a.mp3");
        h.take_log();

        h.report(StageStatus::Failed {
            stage: "mp3_decoder".to_string(),
            reason: "bad frame".to_string(),
        });

        assert_eq!(h.take_log(), vec!["stop", "wait_for_stop"]);
        assert_eq!(h.ctl.state(), PlayerState::Idle);
        {
            let st = h.status.lock().unwrap();
            assert_eq!(st.end_reason, Some(PlaybackEndReason::Error));
            assert_eq!(st.last_error.as_deref(), Some("mp3_decoder: bad frame"));
        }

        h.start_track("a.mp3");
        assert_eq!(h.take_log(), vec!["set_source:a.mp3", "run:2"]);
        assert_eq!(h.ctl.state(), PlayerState::Playing);
    }

    #[test]
    fn relink_failure_is_fatal_to_the_run_and_retried_next_start() {
        let mut graph = RecordingGraph::standard();
        graph.drop_stage("wav_decoder");
        let mut h = Harness::with_graph(MemoryStore::default(), graph);

        h.start_track("b.wav");
        assert_eq!(h.ctl.state(), PlayerState::Idle);
        assert!(
            h.status
                .lock()
                .unwrap()
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("wav_decoder"))
        );

        h.take_log();
        h.start_track("c.mp3");
        assert_eq!(
            h.take_log(),
            vec![
                "relink:file_reader,mp3_decoder,resampler,output_writer",
                "set_source:c.mp3",
                "run:2",
            ]
        );
        assert_eq!(h.ctl.state(), PlayerState::Playing);
    }

    #[test]
    fn run_failure_goes_idle() {
        let mut graph = RecordingGraph::standard();
        graph.fail_run = true;
        let mut h = Harness::with_graph(MemoryStore::default(), graph);
        h.start_track("a.mp3");
        assert_eq!(h.ctl.state(), PlayerState::Idle);
        assert!(h.ctl.active_track().is_none());
        assert_eq!(
            h.status.lock().unwrap().end_reason,
            Some(PlaybackEndReason::Error)
        );
    }

    #[test]
    fn direct_track_finishing_goes_idle() {
        let mut h = Harness::new(ab_store());
        h.start_track("a.mp3");
        h.report(StageStatus::Finished);
        assert_eq!(h.ctl.state(), PlayerState::Idle);
        assert!(h.ctl.active_track().is_none());
        let st = h.status.lock().unwrap();
        assert_eq!(st.end_reason, Some(PlaybackEndReason::Eof));
        assert!(st.now_playing.is_none());
    }

    #[test]
    fn empty_playlist_start_stays_idle() {
        let mut h = Harness::new(MemoryStore::default());
        h.start_playlist("404");
        assert!(h.take_log().is_empty());
        assert_eq!(h.ctl.state(), PlayerState::Idle);
    }

    #[test]
    fn unknown_playlist_start_keeps_the_playing_list() {
        let mut h = Harness::new(MemoryStore::default().with("A", &["a1.mp3", "a2.mp3"]));
        h.start_playlist("A");
        h.take_log();

        h.start_playlist("unknown");
        assert!(h.take_log().is_empty());
        assert_eq!(h.ctl.state(), PlayerState::Playing);
        assert_eq!(h.playlist.identity().as_deref(), Some("A"));
        assert_eq!(h.status.lock().unwrap().playlist.as_deref(), Some("A"));

        h.report(StageStatus::Finished);
        assert!(h.take_log().contains(&"set_source:a2.mp3".to_string()));
        assert_eq!(h.ctl.active_track(), Some(Path::new("a2.mp3")));
        assert_eq!(h.playlist.cursor(), 1);
    }

    #[test]
    fn shutdown_tears_down_the_graph() {
        let mut h = Harness::new(MemoryStore::default());
        h.start_track("a.mp3");
        h.take_log();

        assert!(h.ctl.handle(Command::Shutdown).is_break());
        let log = h.take_log();
        assert_eq!(&log[..3], &["stop", "wait_for_stop", "terminate"]);
        assert_eq!(log.iter().filter(|e| e.starts_with("unregister:")).count(), 6);
        assert!(h.ctl.graph().registered().is_empty());
    }

    #[test]
    fn closed_channel_ends_the_loop_with_teardown() {
        let (tx, rx) = command::channel();
        let graph = RecordingGraph::standard();
        let log = graph.log_handle();
        let ctl = PlaybackController::new(
            graph,
            Chain::standard(DecoderKind::Mp3),
            PlaylistManager::new(Arc::new(MemoryStore::default())),
            rx,
            PlayerStatusState::shared(),
        )
        .unwrap();
        drop(tx);

        ctl.run_loop();
        let log = log.lock().unwrap();
        assert!(log.contains(&"terminate".to_string()));
        assert_eq!(log.iter().filter(|e| e.starts_with("unregister:")).count(), 6);
    }

    #[test]
    fn command_sequences_keep_one_registered_decoder_linked() {
        let mut h = Harness::new(
            MemoryStore::default().with("1", &["a.mp3", "b.aac", "c.wav", "d.ogg"]),
        );
        let script = [
            Command::Start(StartRef::Playlist("1".to_string())),
            Command::Pause,
            Command::Start(StartRef::Track(PathBuf::from("x.aac"))),
            Command::Stop,
            Command::Resume,
            Command::Start(StartRef::Track(PathBuf::from("y.wav"))),
            Command::Start(StartRef::Playlist("1".to_string())),
            Command::Pause,
            Command::Resume,
            Command::Stop,
            Command::Stop,
            Command::Start(StartRef::Track(PathBuf::from("z"))),
        ];
        for round in 0..3 {
            for cmd in script.iter().cloned() {
                h.send(cmd);
                let chain = h.ctl.chain();
                assert_eq!(chain.len(), 4, "round {round}");
                let registered = h.ctl.graph().registered();
                assert!(registered.contains(&chain.decoder().to_string()));
                assert!(chain.decoder().ends_with("_decoder"));
            }
            h.report(StageStatus::Finished);
        }
    }

    #[test]
    fn spawned_controller_processes_commands_until_shutdown() {
        let (tx, rx) = command::channel();
        let graph = RecordingGraph::standard();
        let log = graph.log_handle();
        let ctl = PlaybackController::new(
            graph,
            Chain::standard(DecoderKind::Mp3),
            PlaylistManager::new(Arc::new(ab_store())),
            rx,
            PlayerStatusState::shared(),
        )
        .unwrap();
        let handle = spawn_controller(ctl, tx).unwrap();
        let sender = handle.sender();

        sender.start(StartRef::Playlist("1".to_string())).unwrap();
        sender.pause().unwrap();
        sender.shutdown().unwrap();
        handle.join().unwrap();

        let log = log.lock().unwrap().clone();
        let run = log.iter().position(|e| e == "run:1").unwrap();
        let pause = log.iter().position(|e| e == "pause").unwrap();
        let terminate = log.iter().position(|e| e == "terminate").unwrap();
        assert!(run < pause && pause < terminate);
    }
}
