//! # Session Lifecycle Manager
//!
//! Owns the one live duplex voice session of this process and drives it
//! through its state machine:
//!
//! ```text
//!          start()                 open ack + mic
//!   Idle ──────────► Connecting ─────────────────► Active
//!    ▲                   │                           │
//!    │                   │ stop()            stop() / remote close
//!    │                   ▼                           ▼
//!    └──────────────── Closed ◄──────────────── Closing
//!
//!   any failure after Idle ───────────────────────► Errored
//! ```
//!
//! `Closed` and `Errored` behave exactly like `Idle` for the rest of the
//! application: nothing is live and `start()` is accepted again. `Errored`
//! additionally carries the reason so it can be reported.
//!
//! ## Ownership:
//! `start()` spawns one driver task per session. The driver owns the `Session`
//! (connection, playback scheduler, capture pipeline); the manager only keeps
//! a handle to stop it and a `watch` channel that publishes the state. All
//! mutation of session resources happens inside that single task, one event
//! at a time.
//!
//! ## Starting while live:
//! A `start()` while a session is `Connecting`, `Active` or `Closing` is
//! rejected with `VoiceError::AlreadyActive`. The running session is left
//! untouched.

use crate::audio::capture::{CaptureDevice, CapturePipeline, FrameSink};
use crate::audio::codec::{decode_audio_buffer, text_to_binary};
use crate::audio::playback::{OutputDevice, PlaybackScheduler};
use crate::config::{AppConfig, MAX_CAPTURE_BLOCK_SIZE, MAX_OUTBOUND_QUEUE_FRAMES};
use crate::error::VoiceError;
use crate::memory::{fetch_context_summary, ContextProvider};
use crate::session::instruction::{build_system_instruction, Voice};
use crate::session::protocol::Blob;
use crate::session::stats::VoiceStats;
use crate::session::transport::{RealtimeConnection, RealtimeConnector, ServerEvent, SessionSetup};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Observable state of the voice session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Errored(String),
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Errored(_) => "errored",
        }
    }

    /// A session exists and blocks `start()`.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Active | SessionState::Closing
        )
    }
}

/// Collaborators the manager is constructed with.
#[derive(Clone)]
pub struct SessionDeps {
    pub context: Arc<dyn ContextProvider>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub capture: Arc<dyn CaptureDevice>,
    pub output: Arc<dyn OutputDevice>,
}

/// Per-session settings, fixed when the session starts.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub voice: Voice,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_block_size: usize,
    pub outbound_queue_frames: usize,
    pub context_query: String,
    pub persona_preamble: String,
    pub clinical_focus: String,
}

impl SessionSettings {
    /// Settings from the current configuration, with an optional voice override.
    pub fn from_config(config: &AppConfig, voice: Option<Voice>) -> Self {
        Self {
            model: config.voice.model.clone(),
            voice: voice
                .or_else(|| config.voice.default_voice.parse().ok())
                .unwrap_or_default(),
            input_sample_rate: config.voice.input_sample_rate,
            output_sample_rate: config.voice.output_sample_rate,
            capture_block_size: config.voice.capture_block_size,
            outbound_queue_frames: config.voice.outbound_queue_frames,
            context_query: config.memory.context_query.clone(),
            persona_preamble: config.prompts.persona_preamble.clone(),
            clinical_focus: config.prompts.clinical_focus.clone(),
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(VoiceError::Config("sample rates must be greater than 0".to_string()));
        }
        if !(1..=MAX_CAPTURE_BLOCK_SIZE).contains(&self.capture_block_size) {
            return Err(VoiceError::Config(format!(
                "capture block size must be between 1 and {}",
                MAX_CAPTURE_BLOCK_SIZE
            )));
        }
        if !(1..=MAX_OUTBOUND_QUEUE_FRAMES).contains(&self.outbound_queue_frames) {
            return Err(VoiceError::Config(format!(
                "outbound queue must hold between 1 and {} frames",
                MAX_OUTBOUND_QUEUE_FRAMES
            )));
        }
        if self.model.trim().is_empty() {
            return Err(VoiceError::Config("model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Option<Uuid>,
    pub state: &'static str,
    pub live: bool,
    pub last_error: Option<String>,
}

struct SessionHandle {
    id: Uuid,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Single owner of the live voice session.
pub struct VoiceSessionManager {
    deps: SessionDeps,
    stats: Arc<VoiceStats>,
    state_tx: Arc<watch::Sender<SessionState>>,
    current: Mutex<Option<SessionHandle>>,
}

impl VoiceSessionManager {
    pub fn new(deps: SessionDeps, stats: Arc<VoiceStats>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            deps,
            stats,
            state_tx: Arc::new(state_tx),
            current: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<VoiceStats> {
        self.stats.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let current = self.current.lock().await;
        let state = self.state();
        let last_error = match &state {
            SessionState::Errored(reason) => Some(reason.clone()),
            _ => None,
        };
        SessionStatus {
            session_id: current.as_ref().filter(|_| state.is_live()).map(|h| h.id),
            state: state.as_str(),
            live: state.is_live(),
            last_error,
        }
    }

    /// Begin a new session and return its id once it is `Connecting`.
    ///
    /// Everything slow (context prefetch, handshake, microphone) happens in the
    /// background; follow `subscribe()` to see it reach `Active`.
    pub async fn start(&self, settings: SessionSettings) -> Result<Uuid, VoiceError> {
        settings.validate()?;
        let mut current = self.current.lock().await;

        let state = self.state();
        if state.is_live() {
            warn!(state = state.as_str(), "Rejected start while a session is live");
            return Err(VoiceError::AlreadyActive(state.as_str().to_string()));
        }
        // A finished driver leaves its handle behind; it has nothing left to release
        current.take();

        let id = Uuid::new_v4();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.state_tx.send_replace(SessionState::Connecting);
        self.stats.record_session_started();

        let driver = SessionDriver {
            id,
            settings,
            deps: self.deps.clone(),
            stats: self.stats.clone(),
            state_tx: self.state_tx.clone(),
        };
        let task = tokio::spawn(driver.run(stop_rx));

        info!(session_id = %id, "Voice session starting");
        *current = Some(SessionHandle {
            id,
            stop_tx: Some(stop_tx),
            task,
        });
        Ok(id)
    }

    /// End the current session, whatever state it is in, and wait until its
    /// resources are released. Safe to call when nothing is running.
    pub async fn stop(&self) -> SessionState {
        let handle = self.current.lock().await.take();

        if let Some(mut handle) = handle {
            if let Some(stop_tx) = handle.stop_tx.take() {
                // Fails only when the driver already finished on its own
                let _ = stop_tx.send(());
            }
            if let Err(e) = handle.task.await {
                error!(session_id = %handle.id, error = %e, "Voice session task failed");
                // The driver's guard normally reports this already
                if self.state().is_live() {
                    self.stats.record_session_errored();
                    self.state_tx
                        .send_replace(SessionState::Errored(format!("session task failed: {}", e)));
                }
            }
            info!(session_id = %handle.id, "Voice session stopped");
        }

        self.state()
    }
}

/// How a session's main loop ended.
enum Exit {
    /// User stop or remote close: go through `Closing` to `Closed`
    Graceful,
    /// Connection or capability failure: straight to `Errored`
    Failed(VoiceError),
}

/// Everything one session owns while it runs.
struct Session {
    connection: RealtimeConnection,
    scheduler: PlaybackScheduler,
    capture: Option<CapturePipeline>,
    sink: Option<FrameSink>,
}

impl Session {
    fn invalidate_sink(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.invalidate();
        }
    }

    /// Invalidate the outbound sink first so no frame slips out while the
    /// microphone and socket are being released.
    fn teardown(&mut self) {
        self.invalidate_sink();
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.connection.close();
    }
}

/// Publishes `Errored` if the driver unwinds before a final state is published.
struct FinalStateGuard {
    id: Uuid,
    stats: Arc<VoiceStats>,
    state_tx: Arc<watch::Sender<SessionState>>,
    published: bool,
}

impl FinalStateGuard {
    fn publish(mut self, state: SessionState) {
        self.state_tx.send_replace(state);
        self.published = true;
    }
}

impl Drop for FinalStateGuard {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        error!(session_id = %self.id, "Voice session task ended without a final state");
        self.stats.record_session_errored();
        self.state_tx
            .send_replace(SessionState::Errored("session task panicked".to_string()));
    }
}

struct SessionDriver {
    id: Uuid,
    settings: SessionSettings,
    deps: SessionDeps,
    stats: Arc<VoiceStats>,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl SessionDriver {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let guard = FinalStateGuard {
            id: self.id,
            stats: self.stats.clone(),
            state_tx: self.state_tx.clone(),
            published: false,
        };

        let final_state = match self.drive(&mut stop_rx).await {
            Exit::Graceful => SessionState::Closed,
            Exit::Failed(e) => {
                error!(session_id = %self.id, error = %e, "Voice session failed");
                self.stats.record_session_errored();
                SessionState::Errored(e.to_string())
            }
        };
        info!(session_id = %self.id, state = final_state.as_str(), "Voice session ended");
        guard.publish(final_state);
    }

    async fn drive(&self, stop_rx: &mut oneshot::Receiver<()>) -> Exit {
        // Context prefetch never fails; it can only be cancelled
        let summary = tokio::select! {
            summary = fetch_context_summary(self.deps.context.as_ref(), &self.settings.context_query) => summary,
            _ = &mut *stop_rx => {
                debug!(session_id = %self.id, "Stopped during context prefetch");
                return Exit::Graceful;
            }
        };

        let setup = SessionSetup {
            model: self.settings.model.clone(),
            voice: self.settings.voice,
            system_instruction: build_system_instruction(
                &self.settings.persona_preamble,
                &summary,
                &self.settings.clinical_focus,
            ),
        };

        let output = match self.deps.output.open(self.settings.output_sample_rate) {
            Ok(output) => output,
            Err(e) => return Exit::Failed(e),
        };

        let connection = tokio::select! {
            result = self.deps.connector.connect(setup, self.settings.outbound_queue_frames) => match result {
                Ok(connection) => connection,
                Err(e) => return Exit::Failed(e),
            },
            _ = &mut *stop_rx => {
                debug!(session_id = %self.id, "Stopped during handshake");
                return Exit::Graceful;
            }
        };

        let mut session = Session {
            connection,
            scheduler: PlaybackScheduler::new(output),
            capture: None,
            sink: None,
        };

        let exit = self.run_session(&mut session, stop_rx).await;
        let closing =
            matches!(exit, Exit::Graceful) && session.capture.as_ref().is_some_and(CapturePipeline::is_running);
        // Nothing may reach the wire once Closing is visible
        session.invalidate_sink();
        if closing {
            self.state_tx.send_replace(SessionState::Closing);
        }
        session.teardown();
        exit
    }

    async fn run_session(&self, session: &mut Session, stop_rx: &mut oneshot::Receiver<()>) -> Exit {
        // Wait for the remote acknowledgement before touching the microphone
        loop {
            tokio::select! {
                event = session.connection.events.recv() => match event {
                    Some(ServerEvent::Open) => break,
                    Some(ServerEvent::Audio(_)) => debug!(session_id = %self.id, "Ignoring audio before open"),
                    Some(ServerEvent::Close(reason)) => {
                        return Exit::Failed(VoiceError::Connection(format!(
                            "closed before open: {}",
                            reason.unwrap_or_else(|| "no reason given".to_string())
                        )));
                    }
                    Some(ServerEvent::Error(e)) => return Exit::Failed(VoiceError::Connection(e)),
                    None => {
                        return Exit::Failed(VoiceError::Connection("connection dropped before open".to_string()));
                    }
                },
                _ = &mut *stop_rx => return Exit::Graceful,
            }
        }

        let sink = FrameSink::new(session.connection.outbound.clone(), self.stats.clone());
        match CapturePipeline::start(
            self.deps.capture.as_ref(),
            self.settings.capture_block_size,
            self.settings.input_sample_rate,
            sink.clone(),
        ) {
            Ok(capture) => {
                session.capture = Some(capture);
                session.sink = Some(sink);
            }
            Err(e) => return Exit::Failed(e),
        }

        self.state_tx.send_replace(SessionState::Active);
        info!(session_id = %self.id, voice = %self.settings.voice, "Voice session active");

        loop {
            tokio::select! {
                event = session.connection.events.recv() => match event {
                    Some(ServerEvent::Audio(blob)) => self.play_fragment(&mut session.scheduler, blob),
                    Some(ServerEvent::Open) => {}
                    Some(ServerEvent::Close(reason)) => {
                        info!(session_id = %self.id, reason = ?reason, "Remote closed the session");
                        return Exit::Graceful;
                    }
                    Some(ServerEvent::Error(e)) => return Exit::Failed(VoiceError::Connection(e)),
                    None => {
                        info!(session_id = %self.id, "Remote event stream ended");
                        return Exit::Graceful;
                    }
                },
                _ = &mut *stop_rx => return Exit::Graceful,
            }
        }
    }

    /// Decode one fragment and queue it for playback. Bad fragments are
    /// dropped; the session carries on.
    fn play_fragment(&self, scheduler: &mut PlaybackScheduler, blob: Blob) {
        let buffer = text_to_binary(&blob.data)
            .and_then(|bytes| decode_audio_buffer(&bytes, self.settings.output_sample_rate));

        match buffer {
            Ok(buffer) => {
                let slot = scheduler.enqueue(buffer);
                self.stats.record_fragment_played();
                trace!(
                    session_id = %self.id,
                    start_at = slot.start_at,
                    queued_seconds = scheduler.queued_seconds(),
                    "Queued speech fragment"
                );
            }
            Err(e) => {
                self.stats.record_fragment_dropped();
                debug!(session_id = %self.id, error = %e, "Dropping undecodable fragment");
            }
        }
    }
}
