//! Recording session controller
//!
//! Owns the single-session state machine. A raise spawns the capture loop
//! on a blocking thread plus an async supervisor that waits for it, stops
//! the broadcast, hands the file to persistence and returns to `Idle`.
//! Every spawned task is tracked so shutdown can join it.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{Session, SessionState, StopReason};
use super::worker::{run_session, SessionResources, WorkerObserver, WorkerOutcome};
use crate::alert::{AlertHandler, AlertKind};
use crate::broadcast::{BroadcastController, BroadcastState};
use crate::config::DeviceConfig;
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::persistence::{FinishedRecording, PersistencePipeline, StatusFlagStore};

/// State shared with the worker thread and the supervisor
struct Shared {
    state: Mutex<SessionState>,
    current: Mutex<Option<Session>>,
    last: Mutex<Option<Session>>,
    /// The broadcast reached `Live` during the current session
    streamed: AtomicBool,
    events: Option<Arc<EventBus>>,
}

impl Shared {
    fn set_state(&self, new_state: SessionState) {
        {
            let mut state = self.state.lock();
            if *state == new_state {
                return;
            }
            *state = new_state;
        }
        debug!("Session state -> {}", new_state);
        if let Some(events) = &self.events {
            let file = self
                .current
                .lock()
                .as_ref()
                .map(|s| s.path.display().to_string());
            events.publish(SystemEvent::SessionStateChanged {
                state: new_state.to_string(),
                file,
            });
        }
    }
}

impl WorkerObserver for Shared {
    fn state_changed(&self, state: SessionState) {
        self.set_state(state);
    }

    fn frame_written(&self, frames: u64) {
        if let Some(session) = self.current.lock().as_mut() {
            session.frames_written = frames;
        }
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

pub struct RecordingController {
    shared: Arc<Shared>,
    resources: Arc<SessionResources>,
    device: DeviceConfig,
    broadcast: Option<Arc<BroadcastController>>,
    status: Option<Arc<StatusFlagStore>>,
    pipeline: Option<Arc<PersistencePipeline>>,
    active: Mutex<Option<ActiveSession>>,
    persist_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutting_down: AtomicBool,
}

impl RecordingController {
    pub fn new(
        resources: Arc<SessionResources>,
        device: DeviceConfig,
        broadcast: Option<Arc<BroadcastController>>,
        status: Option<Arc<StatusFlagStore>>,
        pipeline: Option<Arc<PersistencePipeline>>,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                current: Mutex::new(None),
                last: Mutex::new(None),
                streamed: AtomicBool::new(false),
                events,
            }),
            resources,
            device,
            broadcast,
            status,
            pipeline,
            active: Mutex::new(None),
            persist_tasks: Arc::new(Mutex::new(Vec::new())),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// The open session, if any
    pub fn current_session(&self) -> Option<Session> {
        self.shared.current.lock().clone()
    }

    /// The most recently closed session
    pub fn last_session(&self) -> Option<Session> {
        self.shared.last.lock().clone()
    }

    /// Start a session unless one is already open
    ///
    /// Returns whether a session was started.
    pub async fn handle_raise(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("Shutting down, ignoring alert");
            return false;
        }
        {
            let mut state = self.shared.state.lock();
            if *state != SessionState::Idle {
                debug!("Session already {}, ignoring alert", *state);
                return false;
            }
            *state = SessionState::Opening;
        }

        let path = self.resources.settings.next_recording_path();
        let session = Session::new(&self.device.user_id, &self.device.device_id, path.clone(), Utc::now());
        *self.shared.current.lock() = Some(session);
        self.shared.streamed.store(false, Ordering::SeqCst);
        if let Some(events) = &self.shared.events {
            events.publish(SystemEvent::SessionStateChanged {
                state: SessionState::Opening.to_string(),
                file: Some(path.display().to_string()),
            });
        }
        info!("Alert raised, opening session {}", path.display());

        if let Some(status) = &self.status {
            if let Err(e) = status.set_live(true, None).await {
                warn!("Failed to mark live intent: {}", e);
            }
        }

        let cancel = CancellationToken::new();

        let worker = {
            let resources = Arc::clone(&self.resources);
            let broadcast = self.broadcast.clone();
            let observer: Arc<dyn WorkerObserver> = self.shared.clone();
            let cancel = cancel.clone();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || {
                run_session(resources, path, broadcast, observer, cancel, runtime)
            })
        };

        // The broadcast controller publishes the live URL itself once started
        let broadcast_task = self.broadcast.as_ref().map(|broadcast| {
            let broadcast = Arc::clone(broadcast);
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                match broadcast.start(&cancel).await {
                    Ok(()) => shared.streamed.store(true, Ordering::SeqCst),
                    Err(e) => warn!("Streaming unavailable, recording only: {}", e),
                }
            })
        });

        let supervisor = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            worker,
            broadcast_task,
            cancel.clone(),
            self.broadcast.clone(),
            self.status.clone(),
            self.pipeline.clone(),
            Arc::clone(&self.persist_tasks),
        ));

        let previous = self.active.lock().replace(ActiveSession { cancel, supervisor });
        if let Some(previous) = previous {
            // Only reachable once the previous supervisor returned to Idle
            debug!(
                "Replacing finished session handle (finished: {})",
                previous.supervisor.is_finished()
            );
        }
        true
    }

    /// Request the open session to stop
    ///
    /// Returns immediately; closing and persistence continue in the
    /// background. Returns whether a session was signalled.
    pub fn handle_clear(&self) -> bool {
        let active = self.active.lock();
        match active.as_ref() {
            Some(session) if !session.supervisor.is_finished() => {
                info!("Alert cleared, stopping session");
                session.cancel.cancel();
                true
            }
            _ => {
                debug!("Alert cleared with no open session");
                false
            }
        }
    }

    /// Wait for the current session and all persistence work to finish
    pub async fn drain(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            if let Err(e) = active.supervisor.await {
                error!("Session supervisor failed: {}", e);
            }
        }

        loop {
            let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.persist_tasks.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!("Persistence task failed: {}", e);
                }
            }
        }
    }

    /// Stop any session, refuse new ones and join outstanding work
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(session) = self.shared.current.lock().as_mut() {
            session.stop_reason = Some(StopReason::Shutdown);
        }
        if let Some(active) = self.active.lock().as_ref() {
            active.cancel.cancel();
        }
        self.drain().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    shared: Arc<Shared>,
    worker: JoinHandle<WorkerOutcome>,
    broadcast_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    broadcast: Option<Arc<BroadcastController>>,
    status: Option<Arc<StatusFlagStore>>,
    pipeline: Option<Arc<PersistencePipeline>>,
    persist_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let outcome = match worker.await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!("Recording worker panicked: {}", e);
            None
        }
    };

    // A session that ended on its own also abandons pending start attempts
    cancel.cancel();
    if let Some(task) = broadcast_task {
        let _ = task.await;
    }
    let streamed = shared.streamed.load(Ordering::SeqCst);
    if let Some(broadcast) = &broadcast {
        if streamed || broadcast.state() != BroadcastState::Idle {
            broadcast.stop().await;
        }
    }

    let session = shared.current.lock().take();
    let finished = match (session, outcome) {
        (Some(mut session), Some(outcome)) => {
            session.ended_at = Some(outcome.ended_at);
            session.stop_reason.get_or_insert(outcome.reason);
            if let Some(e) = &outcome.error {
                if let Some(events) = &shared.events {
                    events.publish(SystemEvent::error("recording", e.to_string()));
                }
            }
            if let Some(summary) = &outcome.summary {
                session.frames_written = summary.frames_written;
                session.size_bytes = std::fs::metadata(&summary.path).ok().map(|m| m.len());
            }
            info!(
                "Session closed ({:?}): {} frames, {}s",
                session.stop_reason.unwrap_or(outcome.reason),
                session.frames_written,
                session.duration_secs().unwrap_or(0)
            );
            let recording = outcome.summary.map(|summary| FinishedRecording {
                path: summary.path,
                started_at: session.started_at,
                ended_at: outcome.ended_at,
            });
            *shared.last.lock() = Some(session);
            recording
        }
        (session, _) => {
            *shared.last.lock() = session;
            None
        }
    };

    match (finished, pipeline) {
        (Some(recording), Some(pipeline)) => {
            let shared = Arc::clone(&shared);
            let task = tokio::spawn(async move {
                let url = pipeline.persist(recording).await;
                if let Some(last) = shared.last.lock().as_mut() {
                    last.url = url;
                }
            });
            let mut tasks = persist_tasks.lock();
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
        (Some(recording), None) => {
            info!("Recording kept locally at {}", recording.path.display());
        }
        (None, _) => {}
    }

    // Once streaming started, stopping the broadcast cleared the flag
    if !streamed {
        if let Some(status) = &status {
            debug!("Streaming never started, clearing live intent");
            if let Err(e) = status.set_live(false, None).await {
                warn!("Failed to clear live intent: {}", e);
            }
        }
    }

    shared.set_state(SessionState::Idle);
}

#[async_trait]
impl AlertHandler for RecordingController {
    async fn on_alert(&self, kind: AlertKind) -> Result<()> {
        match kind {
            AlertKind::Raised => {
                self.handle_raise().await;
            }
            AlertKind::Cleared => {
                self.handle_clear();
            }
        }
        Ok(())
    }
}
