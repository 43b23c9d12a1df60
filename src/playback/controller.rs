//! The playback state machine
//!
//! Owns the sentence list, position and play/pause state, and drives
//! sentences one at a time through the active speech backend. Runs as a
//! single task: commands arrive over a channel from [`PlayerHandle`],
//! dispatch and timer outcomes arrive over an internal channel, and all
//! session mutation happens inside the task, so no locking is involved.
//!
//! Every dispatch and pacing timer carries the run id it belongs to; any
//! operation that moves the session on (load, stop, seek, voice switch)
//! regenerates the id, so late outcomes and stale timers are discarded
//! instead of mutating a session that has moved on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::playback::observer::{ControlStates, PlaybackEvent, PlaybackObserver};
use crate::speech::{BackendSet, SpeakOutcome, SpeechBackend};
use crate::voice::{BackendKind, VoiceDescriptor};
use crate::{Result, RodokuError};

/// Configuration for the player
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Pause between the end of one sentence and the next dispatch, for
    /// natural cadence
    pub sentence_gap: Duration,

    /// Initial rate multiplier
    pub initial_rate: f32,

    /// Command channel capacity
    pub command_buffer: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sentence_gap: Duration::from_millis(200),
            initial_rate: 1.0,
            command_buffer: 100,
        }
    }
}

impl PlayerConfig {
    pub fn with_sentence_gap(mut self, gap: Duration) -> Self {
        self.sentence_gap = gap;
        self
    }

    pub fn with_initial_rate(mut self, rate: f32) -> Self {
        self.initial_rate = rate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_rate.is_finite() && self.initial_rate > 0.0) {
            return Err(RodokuError::ConfigError(format!(
                "rate must be positive, got {}",
                self.initial_rate
            )));
        }
        Ok(())
    }
}

/// Playback state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No playback; position is at the start
    Idle,
    /// One sentence is dispatched
    Playing,
    /// Dispatch suspended, position retained
    Paused,
}

/// Lock-free view of the session, published after every change
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub current_index: usize,
    pub total: usize,
    pub rate: f32,
    pub active_backend: BackendKind,
}

/// Commands accepted by the player task
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Replace the sentence list, implicitly stopping prior playback
    Load(Vec<String>),
    Play,
    Pause,
    Stop,
    /// Seek-and-play from the given sentence
    PlayFrom(usize),
    /// Switch backend and voice; takes effect immediately
    SelectVoice(VoiceDescriptor),
    SetRate(f32),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Primary,
    Fallback,
}

/// Identity of one dispatch; outcomes with a stale tag are discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpeakTag {
    run: Uuid,
    index: usize,
    attempt: Attempt,
}

enum PlayerMsg {
    SpeakFinished {
        tag: SpeakTag,
        result: Result<SpeakOutcome>,
    },
    GapElapsed {
        run: Uuid,
        index: usize,
    },
}

struct Inflight {
    tag: SpeakTag,
    backend: Arc<dyn SpeechBackend>,
}

/// The mutable aggregate owned exclusively by the player task
struct PlaybackSession {
    sentences: Vec<String>,
    current_index: usize,
    state: PlaybackState,
    rate: f32,
    active_backend: BackendKind,
    active_voice: VoiceDescriptor,
}

/// Handle for controlling the player from the shell
#[derive(Clone)]
pub struct PlayerHandle {
    command_tx: mpsc::Sender<PlayerCommand>,
    snapshot_rx: watch::Receiver<PlaybackSnapshot>,
}

impl PlayerHandle {
    async fn send(&self, cmd: PlayerCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| RodokuError::ChannelError("player task is gone".to_string()))
    }

    pub async fn load(&self, sentences: Vec<String>) -> Result<()> {
        self.send(PlayerCommand::Load(sentences)).await
    }

    pub async fn play(&self) -> Result<()> {
        self.send(PlayerCommand::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(PlayerCommand::Pause).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(PlayerCommand::Stop).await
    }

    pub async fn play_from(&self, index: usize) -> Result<()> {
        self.send(PlayerCommand::PlayFrom(index)).await
    }

    pub async fn select_voice(&self, voice: VoiceDescriptor) -> Result<()> {
        self.send(PlayerCommand::SelectVoice(voice)).await
    }

    pub async fn set_rate(&self, rate: f32) -> Result<()> {
        self.send(PlayerCommand::SetRate(rate)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(PlayerCommand::Shutdown).await
    }

    /// Current session state.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// The playback controller task
pub struct Player {
    session: PlaybackSession,
    backends: BackendSet,
    observer: Arc<dyn PlaybackObserver>,
    config: PlayerConfig,
    command_rx: mpsc::Receiver<PlayerCommand>,
    outcome_tx: mpsc::UnboundedSender<PlayerMsg>,
    outcome_rx: mpsc::UnboundedReceiver<PlayerMsg>,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    run_id: Uuid,
    inflight: Option<Inflight>,
}

impl Player {
    /// Create a player over the given backends.
    ///
    /// Fails with [`RodokuError::NoBackendAvailable`] when the set is
    /// empty: playback could never start.
    pub fn new(
        backends: BackendSet,
        initial_voice: VoiceDescriptor,
        observer: Arc<dyn PlaybackObserver>,
        config: PlayerConfig,
    ) -> Result<(Self, PlayerHandle)> {
        config.validate()?;
        if backends.is_empty() {
            return Err(RodokuError::NoBackendAvailable);
        }

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let session = PlaybackSession {
            sentences: Vec::new(),
            current_index: 0,
            state: PlaybackState::Idle,
            rate: config.initial_rate,
            active_backend: initial_voice.kind,
            active_voice: initial_voice,
        };

        let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot {
            state: session.state,
            current_index: session.current_index,
            total: 0,
            rate: session.rate,
            active_backend: session.active_backend,
        });

        let player = Self {
            session,
            backends,
            observer,
            config,
            command_rx,
            outcome_tx,
            outcome_rx,
            snapshot_tx,
            run_id: Uuid::new_v4(),
            inflight: None,
        };

        let handle = PlayerHandle {
            command_tx,
            snapshot_rx,
        };

        Ok((player, handle))
    }

    /// Start the player task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands and dispatch outcomes until shut down.
    pub async fn run(mut self) {
        info!("playback controller started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(PlayerCommand::Shutdown) | None => {
                        self.cancel_inflight();
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(msg) = self.outcome_rx.recv() => self.handle_message(msg),
            }
            self.publish_snapshot();
        }

        info!("playback controller stopped");
    }

    fn handle_command(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::Load(sentences) => self.load(sentences),
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::PlayFrom(index) => self.play_from(index),
            PlayerCommand::SelectVoice(voice) => self.select_voice(voice),
            PlayerCommand::SetRate(rate) => self.set_rate(rate),
            // Handled by the run loop
            PlayerCommand::Shutdown => {}
        }
    }

    fn handle_message(&mut self, msg: PlayerMsg) {
        match msg {
            PlayerMsg::SpeakFinished { tag, result } => self.on_speak_finished(tag, result),
            PlayerMsg::GapElapsed { run, index } => self.on_gap_elapsed(run, index),
        }
    }

    fn load(&mut self, sentences: Vec<String>) {
        let was_active = self.session.state != PlaybackState::Idle;
        self.cancel_inflight();
        self.invalidate();

        info!("loaded article with {} sentences", sentences.len());
        self.session.sentences = sentences;
        self.session.current_index = 0;
        self.session.state = PlaybackState::Idle;

        if was_active {
            self.emit(PlaybackEvent::Stopped);
        }
        self.observer.highlight_changed(None);
        self.observer
            .progress_changed(0, self.session.sentences.len());
        self.push_controls();
    }

    fn play(&mut self) {
        match self.session.state {
            PlaybackState::Playing => debug!("play ignored: already playing"),
            PlaybackState::Paused => {
                self.session.state = PlaybackState::Playing;
                self.emit(PlaybackEvent::Resumed);
                match &self.inflight {
                    Some(inflight) => {
                        inflight.backend.resume();
                        self.push_controls();
                    }
                    None => {
                        // Paused between sentences: nothing to resume.
                        // Start the advanced sentence fresh and invalidate
                        // any gap timer still pending.
                        self.invalidate();
                        self.dispatch_current();
                    }
                }
            }
            PlaybackState::Idle => {
                if self.session.sentences.is_empty() {
                    debug!("play ignored: nothing loaded");
                    return;
                }
                self.session.state = PlaybackState::Playing;
                self.dispatch_current();
            }
        }
    }

    fn pause(&mut self) {
        if self.session.state != PlaybackState::Playing {
            debug!("pause ignored in {:?}", self.session.state);
            return;
        }
        self.session.state = PlaybackState::Paused;
        if let Some(inflight) = &self.inflight {
            inflight.backend.pause();
        }
        self.emit(PlaybackEvent::Paused);
        self.push_controls();
    }

    fn stop(&mut self) {
        self.halt();
    }

    fn play_from(&mut self, index: usize) {
        if index >= self.session.sentences.len() {
            debug!(
                "seek out of range: {} >= {}",
                index,
                self.session.sentences.len()
            );
            return;
        }
        if self.session.state != PlaybackState::Idle {
            self.halt();
        }
        self.session.current_index = index;
        self.session.state = PlaybackState::Playing;
        self.dispatch_current();
    }

    fn select_voice(&mut self, voice: VoiceDescriptor) {
        info!("voice -> {} [{}]", voice.display_name, voice.kind);
        let was_active = self.session.state != PlaybackState::Idle;
        let resume_at = self.session.current_index;
        self.session.active_backend = voice.kind;
        self.session.active_voice = voice;

        if was_active {
            // Neither backend can hot-swap a voice mid-utterance, so the
            // current sentence restarts from its beginning.
            self.halt();
            self.play_from(resume_at);
        }
    }

    fn set_rate(&mut self, rate: f32) {
        if !(rate.is_finite() && rate > 0.0) {
            warn!("ignoring invalid rate {}", rate);
            return;
        }
        self.session.rate = rate;
        if let Some(inflight) = &self.inflight {
            if inflight.backend.set_live_rate(rate) {
                debug!("rate {} applied to utterance in flight", rate);
            }
        }
    }

    fn dispatch_current(&mut self) {
        let index = self.session.current_index;
        let total = self.session.sentences.len();

        let Some(text) = self.session.sentences.get(index).cloned() else {
            self.halt();
            return;
        };
        let Some(backend) = self.backends.resolve(self.session.active_backend).cloned() else {
            self.emit(PlaybackEvent::Error(
                RodokuError::NoBackendAvailable.to_string(),
            ));
            self.halt();
            return;
        };

        debug!("dispatch sentence {}/{} via {}", index + 1, total, backend.kind());
        self.emit(PlaybackEvent::SentenceStarted(index));
        self.observer.progress_changed(index, total);
        self.observer.highlight_changed(Some(index));
        self.push_controls();

        let tag = SpeakTag {
            run: self.run_id,
            index,
            attempt: Attempt::Primary,
        };
        self.begin_utterance(backend, text, tag);
    }

    fn begin_utterance(&mut self, backend: Arc<dyn SpeechBackend>, text: String, tag: SpeakTag) {
        let rate = self.session.rate;
        let voice = self.session.active_voice.clone();
        let outcome_tx = self.outcome_tx.clone();
        self.inflight = Some(Inflight {
            tag,
            backend: backend.clone(),
        });

        tokio::spawn(async move {
            let result = backend.speak(&text, rate, &voice).await;
            let _ = outcome_tx.send(PlayerMsg::SpeakFinished { tag, result });
        });
    }

    fn on_speak_finished(&mut self, tag: SpeakTag, result: Result<SpeakOutcome>) {
        let stale =
            tag.run != self.run_id || self.inflight.as_ref().map_or(true, |i| i.tag != tag);
        if stale {
            debug!("discarding stale outcome for sentence {}", tag.index);
            return;
        }
        let Some(inflight) = self.inflight.take() else {
            return;
        };
        let spoke_with = inflight.backend.kind();

        match result {
            Ok(SpeakOutcome::Completed) => {
                self.emit(PlaybackEvent::SentenceEnded(tag.index));
                self.session.current_index += 1;

                if self.session.current_index >= self.session.sentences.len() {
                    info!("reached end of article");
                    self.halt();
                } else if self.session.state == PlaybackState::Playing {
                    self.schedule_gap();
                }
                // Paused: the advanced sentence is dispatched on resume.
            }
            Ok(SpeakOutcome::Cancelled) => {
                // Cancellation is always initiated here, and initiating it
                // makes the tag stale first. Degrade to a clean stop.
                warn!("utterance cancelled outside the player");
                self.halt();
            }
            Err(e) => {
                if tag.attempt == Attempt::Primary && spoke_with == BackendKind::Remote {
                    if let Some(local) = self.backends.local().cloned() {
                        if let Some(text) = self.session.sentences.get(tag.index).cloned() {
                            warn!(
                                "remote synthesis failed ({}), retrying sentence {} locally",
                                e, tag.index
                            );
                            let fallback = SpeakTag {
                                run: tag.run,
                                index: tag.index,
                                attempt: Attempt::Fallback,
                            };
                            self.begin_utterance(local, text, fallback);
                            return;
                        }
                    }
                }
                warn!("synthesis failed with no fallback left: {}", e);
                self.emit(PlaybackEvent::Error(e.to_string()));
                self.halt();
            }
        }
    }

    fn schedule_gap(&self) {
        let run = self.run_id;
        let index = self.session.current_index;
        let delay = self.config.sentence_gap;
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = outcome_tx.send(PlayerMsg::GapElapsed { run, index });
        });
    }

    fn on_gap_elapsed(&mut self, run: Uuid, index: usize) {
        if run != self.run_id || index != self.session.current_index {
            debug!("discarding stale gap timer for sentence {}", index);
            return;
        }
        match self.session.state {
            PlaybackState::Playing => self.dispatch_current(),
            // A pause or stop issued during the gap wins over the timer;
            // resume re-dispatches.
            other => debug!("gap elapsed while {:?}", other),
        }
    }

    /// Shared stop path: cancel in-flight work, reset position, go idle.
    fn halt(&mut self) {
        self.cancel_inflight();
        self.invalidate();
        self.session.current_index = 0;
        self.session.state = PlaybackState::Idle;
        self.observer.highlight_changed(None);
        self.observer
            .progress_changed(0, self.session.sentences.len());
        self.emit(PlaybackEvent::Stopped);
        self.push_controls();
    }

    fn cancel_inflight(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.backend.cancel();
        }
    }

    /// Regenerate the run id so outcomes of prior dispatches and timers
    /// compare stale.
    fn invalidate(&mut self) {
        self.run_id = Uuid::new_v4();
    }

    fn emit(&self, event: PlaybackEvent) {
        self.observer.playback_event(event);
    }

    fn push_controls(&self) {
        let s = &self.session;
        self.observer.controls_changed(ControlStates {
            state: s.state,
            can_play: !s.sentences.is_empty() && s.state != PlaybackState::Playing,
            can_pause: s.state == PlaybackState::Playing,
            can_stop: !s.sentences.is_empty(),
        });
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(PlaybackSnapshot {
            state: self.session.state,
            current_index: self.session.current_index,
            total: self.session.sentences.len(),
            rate: self.session.rate,
            active_backend: self.session.active_backend,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<PlaybackEvent>>,
        highlights: Mutex<Vec<Option<usize>>>,
        controls: Mutex<Vec<ControlStates>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<PlaybackEvent> {
            self.events.lock().clone()
        }

        fn has_event(&self, event: &PlaybackEvent) -> bool {
            self.events.lock().iter().any(|e| e == event)
        }
    }

    impl PlaybackObserver for RecordingObserver {
        fn playback_event(&self, event: PlaybackEvent) {
            self.events.lock().push(event);
        }

        fn highlight_changed(&self, index: Option<usize>) {
            self.highlights.lock().push(index);
        }

        fn controls_changed(&self, controls: ControlStates) {
            self.controls.lock().push(controls);
        }
    }

    enum ScriptStep {
        Complete,
        Fail(String),
        Wait(oneshot::Receiver<Result<SpeakOutcome>>),
    }

    /// Backend fake driven by a per-call script; unscripted calls complete
    /// immediately.
    struct ScriptedBackend {
        backend_kind: BackendKind,
        script: Mutex<VecDeque<ScriptStep>>,
        spoken: Mutex<Vec<String>>,
        rates: Mutex<Vec<f32>>,
        live_rates: Mutex<Vec<f32>>,
        pauses: AtomicUsize,
        resumes: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(backend_kind: BackendKind) -> Arc<Self> {
            Arc::new(Self {
                backend_kind,
                script: Mutex::new(VecDeque::new()),
                spoken: Mutex::new(Vec::new()),
                rates: Mutex::new(Vec::new()),
                live_rates: Mutex::new(Vec::new()),
                pauses: AtomicUsize::new(0),
                resumes: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            })
        }

        fn push(&self, step: ScriptStep) {
            self.script.lock().push_back(step);
        }

        /// Script a call that blocks until the returned sender fires.
        fn hold_next(&self) -> oneshot::Sender<Result<SpeakOutcome>> {
            let (tx, rx) = oneshot::channel();
            self.push(ScriptStep::Wait(rx));
            tx
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().clone()
        }
    }

    #[async_trait]
    impl SpeechBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            self.backend_kind
        }

        async fn speak(
            &self,
            text: &str,
            rate: f32,
            _voice: &VoiceDescriptor,
        ) -> Result<SpeakOutcome> {
            self.spoken.lock().push(text.to_owned());
            self.rates.lock().push(rate);
            let step = self.script.lock().pop_front();
            match step {
                None | Some(ScriptStep::Complete) => Ok(SpeakOutcome::Completed),
                Some(ScriptStep::Fail(reason)) => Err(RodokuError::SynthesisFailed(reason)),
                Some(ScriptStep::Wait(rx)) => rx.await.unwrap_or(Ok(SpeakOutcome::Cancelled)),
            }
        }

        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn set_live_rate(&self, rate: f32) -> bool {
            self.live_rates.lock().push(rate);
            true
        }
    }

    struct Harness {
        handle: PlayerHandle,
        observer: Arc<RecordingObserver>,
    }

    fn remote_voice() -> VoiceDescriptor {
        VoiceDescriptor::new(BackendKind::Remote, "1", "ずんだもん (ノーマル)")
    }

    fn start(backends: BackendSet, voice: VoiceDescriptor) -> Harness {
        let observer = Arc::new(RecordingObserver::default());
        let (player, handle) =
            Player::new(backends, voice, observer.clone(), PlayerConfig::default()).unwrap();
        player.spawn();
        Harness { handle, observer }
    }

    fn start_local_only() -> (Harness, Arc<ScriptedBackend>) {
        let local = ScriptedBackend::new(BackendKind::Local);
        let harness = start(
            BackendSet::new().with_local(local.clone()),
            VoiceDescriptor::host_default(),
        );
        (harness, local)
    }

    fn sentences(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("文{}", i)).collect()
    }

    /// Spin virtual time until the condition holds.
    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_visits_every_sentence_in_order_then_idles() {
        let (h, local) = start_local_only();

        h.handle.load(sentences(4)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;

        assert_eq!(local.spoken(), sentences(4));
        let events = h.observer.events();
        let starts: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                PlaybackEvent::SentenceStarted(i) => Some(*i),
                _ => None,
            })
            .collect();
        let ends: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                PlaybackEvent::SentenceEnded(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1, 2, 3]);
        assert_eq!(ends, vec![0, 1, 2, 3]);

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.current_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_position_and_state() {
        let (h, local) = start_local_only();
        let _hold = local.hold_next();

        h.handle.load(sentences(3)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        h.handle.stop().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Idle).await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.current_index, 0);
        assert_eq!(local.cancels.load(Ordering::SeqCst), 1);
        assert!(h.observer.has_event(&PlaybackEvent::Stopped));
        // Highlight cleared
        assert_eq!(h.observer.highlights.lock().last(), Some(&None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_from_any_state() {
        let (h, _local) = start_local_only();

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.stop().await.unwrap();
        h.handle.stop().await.unwrap();
        settle().await;

        assert_eq!(h.handle.snapshot().state, PlaybackState::Idle);
        assert_eq!(h.handle.snapshot().current_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_from_skips_to_index() {
        let (h, local) = start_local_only();
        let hold = local.hold_next();

        h.handle.load(sentences(5)).await.unwrap();
        h.handle.play_from(2).await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        assert_eq!(h.handle.snapshot().current_index, 2);
        assert_eq!(local.spoken(), vec!["文2"]);

        hold.send(Ok(SpeakOutcome::Completed)).unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;

        // Sentences 0 and 1 were never visited
        assert_eq!(local.spoken(), vec!["文2", "文3", "文4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_from_out_of_range_is_silent_noop() {
        let (h, local) = start_local_only();

        h.handle.load(sentences(3)).await.unwrap();
        h.handle.play_from(7).await.unwrap();
        settle().await;

        assert_eq!(h.handle.snapshot().state, PlaybackState::Idle);
        assert!(local.spoken().is_empty());
        assert!(h.observer.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_falls_back_once_and_is_not_sticky() {
        let remote = ScriptedBackend::new(BackendKind::Remote);
        let local = ScriptedBackend::new(BackendKind::Local);
        remote.push(ScriptStep::Fail("connection refused".to_string()));

        let h = start(
            BackendSet::new()
                .with_local(local.clone())
                .with_remote(remote.clone()),
            remote_voice(),
        );

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;

        // Sentence 0 retried locally exactly once; sentence 1 went back to
        // the remote backend.
        assert_eq!(remote.spoken(), vec!["文0", "文1"]);
        assert_eq!(local.spoken(), vec!["文0"]);
        assert!(!h
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_surfaces_error_and_stops() {
        let remote = ScriptedBackend::new(BackendKind::Remote);
        let local = ScriptedBackend::new(BackendKind::Local);
        remote.push(ScriptStep::Fail("boom".to_string()));
        local.push(ScriptStep::Fail("engine broke".to_string()));

        let h = start(
            BackendSet::new()
                .with_local(local.clone())
                .with_remote(remote.clone()),
            remote_voice(),
        );

        h.handle.load(sentences(3)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Idle && !local.spoken().is_empty())
            .await;
        settle().await;

        assert_eq!(remote.spoken(), vec!["文0"]);
        assert_eq!(local.spoken(), vec!["文0"]);
        assert!(h
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Error(_))));
        assert_eq!(h.handle.snapshot().current_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_primary_failure_has_no_fallback() {
        let (h, local) = start_local_only();
        local.push(ScriptStep::Fail("engine broke".to_string()));

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;

        assert_eq!(local.spoken(), vec!["文0"]);
        assert!(h
            .observer
            .events()
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_after_stop_is_discarded() {
        let (h, local) = start_local_only();
        let hold = local.hold_next();

        h.handle.load(sentences(3)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        h.handle.stop().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Idle).await;
        let events_at_stop = h.observer.events().len();

        // Deliver the outcome for the cancelled dispatch
        hold.send(Ok(SpeakOutcome::Completed)).unwrap();
        settle().await;

        assert!(!h.observer.has_event(&PlaybackEvent::SentenceEnded(0)));
        assert_eq!(h.observer.events().len(), events_at_stop);
        assert_eq!(h.handle.snapshot().state, PlaybackState::Idle);
        assert_eq!(local.spoken(), vec!["文0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_mid_utterance() {
        let (h, local) = start_local_only();
        let hold = local.hold_next();

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        h.handle.pause().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Paused).await;
        assert_eq!(local.pauses.load(Ordering::SeqCst), 1);
        assert!(h.observer.has_event(&PlaybackEvent::Paused));

        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;
        assert_eq!(local.resumes.load(Ordering::SeqCst), 1);
        assert!(h.observer.has_event(&PlaybackEvent::Resumed));

        // No second dispatch of the same sentence
        assert_eq!(local.spoken(), vec!["文0"]);
        hold.send(Ok(SpeakOutcome::Completed)).unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;
        assert_eq!(local.spoken(), vec!["文0", "文1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_gap_is_honored() {
        let (h, local) = start_local_only();
        let hold = local.hold_next();

        h.handle.load(sentences(3)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        // Finish sentence 0 and pause immediately; the pacing timer must
        // not dispatch sentence 1 underneath the pause.
        hold.send(Ok(SpeakOutcome::Completed)).unwrap();
        h.handle.pause().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Paused).await;
        settle().await;

        assert_eq!(local.spoken(), vec!["文0"]);
        assert_eq!(h.handle.snapshot().state, PlaybackState::Paused);
        assert_eq!(h.handle.snapshot().current_index, 1);

        // Resume dispatches the advanced sentence fresh
        h.handle.play().await.unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;
        assert_eq!(local.spoken(), sentences(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_is_noop_when_idle() {
        let (h, _local) = start_local_only();

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.pause().await.unwrap();
        settle().await;

        assert!(!h.observer.has_event(&PlaybackEvent::Paused));
        assert_eq!(h.handle.snapshot().state, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_is_noop_when_already_playing() {
        let (h, local) = start_local_only();
        let _hold = local.hold_next();

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        h.handle.play().await.unwrap();
        settle().await;

        assert_eq!(local.spoken(), vec!["文0"]);
        let starts = h
            .observer
            .events()
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::SentenceStarted(_)))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_change_while_playing_restarts_current_sentence() {
        let remote = ScriptedBackend::new(BackendKind::Remote);
        let local = ScriptedBackend::new(BackendKind::Local);
        let _hold = remote.hold_next();

        let h = start(
            BackendSet::new()
                .with_local(local.clone())
                .with_remote(remote.clone()),
            remote_voice(),
        );

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;
        assert_eq!(remote.spoken(), vec!["文0"]);

        h.handle
            .select_voice(VoiceDescriptor::host_default())
            .await
            .unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;
        wait_for(|| !local.spoken().is_empty()).await;

        // The in-flight remote utterance was cancelled and the same
        // sentence restarted from its beginning on the local backend.
        assert_eq!(remote.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(local.spoken()[0], "文0");

        wait_for(|| local.spoken().len() == 2).await;
        assert_eq!(local.spoken(), vec!["文0", "文1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_applies_live_and_to_next_dispatch() {
        let (h, local) = start_local_only();
        let hold = local.hold_next();

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        h.handle.set_rate(1.5).await.unwrap();
        wait_for(|| !local.live_rates.lock().is_empty()).await;
        assert_eq!(*local.live_rates.lock(), vec![1.5]);

        hold.send(Ok(SpeakOutcome::Completed)).unwrap();
        wait_for(|| h.observer.has_event(&PlaybackEvent::Stopped)).await;
        assert_eq!(*local.rates.lock(), vec![1.0, 1.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rate_is_ignored() {
        let (h, _local) = start_local_only();

        h.handle.set_rate(0.0).await.unwrap();
        h.handle.set_rate(-2.0).await.unwrap();
        h.handle.set_rate(f32::NAN).await.unwrap();
        settle().await;

        assert_eq!(h.handle.snapshot().rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_with_nothing_loaded_is_noop() {
        let (h, local) = start_local_only();

        h.handle.play().await.unwrap();
        settle().await;

        assert!(local.spoken().is_empty());
        assert_eq!(h.handle.snapshot().state, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_while_playing_stops_first() {
        let (h, local) = start_local_only();
        let _hold = local.hold_next();

        h.handle.load(sentences(3)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        h.handle.load(vec!["新しい記事".to_string()]).await.unwrap();
        wait_for(|| h.handle.snapshot().total == 1).await;

        assert_eq!(local.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(h.handle.snapshot().state, PlaybackState::Idle);
        assert_eq!(h.handle.snapshot().current_index, 0);
        assert!(h.observer.has_event(&PlaybackEvent::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_follow_state() {
        let (h, local) = start_local_only();
        let _hold = local.hold_next();

        h.handle.load(sentences(2)).await.unwrap();
        h.handle.play().await.unwrap();
        wait_for(|| h.handle.snapshot().state == PlaybackState::Playing).await;

        let controls = *h.observer.controls.lock().last().unwrap();
        assert!(!controls.can_play);
        assert!(controls.can_pause);
        assert!(controls.can_stop);
    }

    #[test]
    fn test_empty_backend_set_is_rejected() {
        let observer = Arc::new(RecordingObserver::default());
        let result = Player::new(
            BackendSet::new(),
            VoiceDescriptor::host_default(),
            observer,
            PlayerConfig::default(),
        );
        assert!(matches!(result, Err(RodokuError::NoBackendAvailable)));
    }

    #[test]
    fn test_config_validation() {
        assert!(PlayerConfig::default().validate().is_ok());
        assert!(PlayerConfig::default()
            .with_initial_rate(0.0)
            .validate()
            .is_err());
    }
}
