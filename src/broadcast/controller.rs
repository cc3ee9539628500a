//! Broadcast lifecycle
//!
//! Provisions the relay scene/source, starts the live output with bounded
//! retries and keeps it alive with a periodic health check.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::obs::{BroadcasterConnector, BroadcasterControl};
use super::types::{BroadcastState, LiveBinding, SourceSettings, StreamServiceSettings};
use super::youtube::LivePlatform;
use crate::config::BroadcasterConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::persistence::StatusFlagStore;

/// Retry policy for one controller operation
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    fn new(attempts: u32, backoff_secs: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Duration::from_secs(backoff_secs),
        }
    }
}

struct HealthTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BroadcastController {
    connector: Arc<dyn BroadcasterConnector>,
    platform: Option<Arc<dyn LivePlatform>>,
    scene: String,
    source: String,
    source_settings: SourceSettings,
    /// Custom RTMP destination used when no live platform is configured
    rtmp_target: Option<StreamServiceSettings>,
    connect_policy: RetryPolicy,
    provision_policy: RetryPolicy,
    start_policy: RetryPolicy,
    health_interval: Duration,
    /// Control session, reconnected lazily after failures
    session: tokio::sync::Mutex<Option<Box<dyn BroadcasterControl>>>,
    state: RwLock<BroadcastState>,
    live_url: RwLock<Option<String>>,
    /// Platform binding reused across start attempts
    binding: Mutex<Option<LiveBinding>>,
    start_attempts: AtomicU32,
    health: Mutex<Option<HealthTask>>,
    events: Option<Arc<EventBus>>,
    status: Option<Arc<StatusFlagStore>>,
}

impl BroadcastController {
    pub fn new(
        config: &BroadcasterConfig,
        source_settings: SourceSettings,
        connector: Arc<dyn BroadcasterConnector>,
        platform: Option<Arc<dyn LivePlatform>>,
    ) -> Self {
        let rtmp_target = match (&config.rtmp_server, &config.stream_key) {
            (Some(server), Some(key)) if !server.is_empty() && !key.is_empty() => {
                Some(StreamServiceSettings {
                    server: server.clone(),
                    key: key.clone(),
                })
            }
            _ => None,
        };

        Self {
            connector,
            platform,
            scene: config.scene.clone(),
            source: config.source.clone(),
            source_settings,
            rtmp_target,
            connect_policy: RetryPolicy::new(config.connect_attempts, config.connect_backoff_secs),
            provision_policy: RetryPolicy::new(
                config.provision_attempts,
                config.provision_backoff_secs,
            ),
            start_policy: RetryPolicy::new(config.start_attempts, config.start_backoff_secs),
            health_interval: Duration::from_secs(config.health_check_interval_secs.max(1)),
            session: tokio::sync::Mutex::new(None),
            state: RwLock::new(BroadcastState::Idle),
            live_url: RwLock::new(None),
            binding: Mutex::new(None),
            start_attempts: AtomicU32::new(0),
            health: Mutex::new(None),
            events: None,
            status: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Publish the live flag and watch URL on start, clear it on stop
    pub fn with_status_flag(mut self, status: Arc<StatusFlagStore>) -> Self {
        self.status = Some(status);
        self
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: Duration) -> Self {
        self.connect_policy.backoff = backoff;
        self.provision_policy.backoff = backoff;
        self.start_policy.backoff = backoff;
        self
    }

    #[cfg(test)]
    fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn state(&self) -> BroadcastState {
        *self.state.read()
    }

    /// Public watch URL of the current or last broadcast
    pub fn live_url(&self) -> Option<String> {
        self.live_url.read().clone()
    }

    /// Total start attempts made since creation
    pub fn start_attempts(&self) -> u32 {
        self.start_attempts.load(Ordering::SeqCst)
    }

    pub fn health_check_scheduled(&self) -> bool {
        self.health
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    fn set_state(&self, new_state: BroadcastState) {
        let changed = {
            let mut state = self.state.write();
            let changed = *state != new_state;
            *state = new_state;
            changed
        };
        if changed {
            debug!("Broadcast state -> {}", new_state);
            if let Some(events) = &self.events {
                events.publish(SystemEvent::BroadcastStateChanged {
                    state: new_state.to_string(),
                    url: self.live_url(),
                });
            }
        }
    }

    /// Verify the broadcaster is reachable, keeping the session open
    pub async fn connect_with_retries(&self) -> Result<()> {
        let policy = self.connect_policy;
        let mut last_error = None;

        for attempt in 1..=policy.attempts {
            match self.connector.connect().await {
                Ok(control) => {
                    *self.session.lock().await = Some(control);
                    info!("Broadcaster reachable (attempt {}/{})", attempt, policy.attempts);
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    error!("Broadcaster connection not possible: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Broadcaster connection attempt {}/{} failed: {}",
                        attempt, policy.attempts, e
                    );
                    last_error = Some(e);
                    if attempt < policy.attempts {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::BroadcasterUnavailable("no connection attempts".into())))
    }

    /// Idempotently create the scene and (re)create the relay source
    pub async fn ensure_scene_and_source(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connector.connect().await?);
        }
        let result = match guard.as_mut() {
            Some(control) => self.provision(control.as_mut()).await,
            None => Err(AppError::BroadcasterUnavailable("no session".into())),
        };
        if result.is_err() {
            guard.take();
        }
        result
    }

    async fn provision(&self, control: &mut dyn BroadcasterControl) -> Result<()> {
        let policy = self.provision_policy;
        let mut attempt = 1;
        loop {
            match self.provision_once(control).await {
                Ok(()) => {
                    info!("Scene '{}' with source '{}' ready", self.scene, self.source);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < policy.attempts => {
                    warn!(
                        "Provisioning attempt {}/{} failed: {}",
                        attempt, policy.attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn provision_once(&self, control: &mut dyn BroadcasterControl) -> Result<()> {
        let scenes = control.scene_names().await.map_err(provision_step("list scenes"))?;
        if !scenes.contains(&self.scene) {
            info!("Creating scene '{}'", self.scene);
            control
                .create_scene(&self.scene)
                .await
                .map_err(provision_step("create scene"))?;
        }

        // Recreate the source so its URL and geometry follow the current config
        let inputs = control.input_names().await.map_err(provision_step("list inputs"))?;
        if inputs.contains(&self.source) {
            debug!("Removing existing source '{}'", self.source);
            control
                .remove_input(&self.source)
                .await
                .map_err(provision_step("remove source"))?;
        }
        control
            .create_browser_input(&self.scene, &self.source, &self.source_settings)
            .await
            .map_err(provision_step("create source"))?;

        let items = control
            .scene_item_names(&self.scene)
            .await
            .map_err(provision_step("list scene items"))?;
        if !items.contains(&self.source) {
            control
                .add_scene_item(&self.scene, &self.source)
                .await
                .map_err(provision_step("add source to scene"))?;
        }

        control
            .set_program_scene(&self.scene)
            .await
            .map_err(provision_step("activate scene"))
    }

    /// Start the live output with bounded retries
    ///
    /// On success the state becomes `Live` and the health check is scheduled.
    /// Cancelling `cancel` abandons the remaining attempts.
    pub async fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        self.start_with_retries(cancel).await?;
        if let Some(status) = &self.status {
            let url = self.live_url();
            if let Err(e) = status.set_live(true, url.as_deref()).await {
                warn!("Failed to publish live status: {}", e);
            }
        }
        self.schedule_health_check();
        Ok(())
    }

    async fn start_with_retries(&self, cancel: &CancellationToken) -> Result<()> {
        let policy = self.start_policy;
        self.set_state(BroadcastState::Provisioning);

        let mut last_error = None;
        for attempt in 1..=policy.attempts {
            if cancel.is_cancelled() {
                self.set_state(BroadcastState::Idle);
                return Err(AppError::Cancelled("broadcast start".into()));
            }
            self.start_attempts.fetch_add(1, Ordering::SeqCst);

            match self.try_start().await {
                Ok(()) => {
                    info!(
                        "Live output started (attempt {}/{})",
                        attempt, policy.attempts
                    );
                    self.set_state(BroadcastState::Live);
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    error!("Live output cannot start, not retrying: {}", e);
                    last_error = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Start attempt {}/{} failed: {}",
                        attempt, policy.attempts, e
                    );
                    // Force a fresh control session for the next attempt
                    self.session.lock().await.take();
                    last_error = Some(e);
                    if attempt < policy.attempts {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(policy.backoff) => {}
                        }
                    }
                }
            }
        }

        self.dump_configuration().await;
        self.set_state(BroadcastState::Idle);
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".into());
        error!("Live output failed to start: {}", reason);
        Err(AppError::StartFailed {
            attempts: self.start_attempts(),
            reason,
        })
    }

    async fn try_start(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connector.connect().await?);
        }
        let control = match guard.as_mut() {
            Some(control) => control.as_mut(),
            None => return Err(AppError::BroadcasterUnavailable("no session".into())),
        };

        if control.output_active().await? {
            info!("Live output already active");
            return Ok(());
        }

        self.provision(control).await?;

        if let Some(platform) = &self.platform {
            let cached = self.binding.lock().clone();
            let binding = match cached {
                Some(binding) => binding,
                None => {
                    let binding = platform.create_binding().await?;
                    *self.binding.lock() = Some(binding.clone());
                    binding
                }
            };
            control
                .set_stream_service(&StreamServiceSettings {
                    server: binding.ingest_url.clone(),
                    key: binding.stream_key.clone(),
                })
                .await?;
            *self.live_url.write() = Some(binding.watch_url);
        } else if let Some(target) = &self.rtmp_target {
            control.set_stream_service(target).await?;
        }

        control.set_program_scene(&self.scene).await?;
        control.start_output().await
    }

    /// Whether the live output is currently active on the broadcaster
    pub async fn is_live(&self) -> Result<bool> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connector.connect().await?);
        }
        let result = match guard.as_mut() {
            Some(control) => control.output_active().await,
            None => Ok(false),
        };
        if result.is_err() {
            guard.take();
        }
        result
    }

    /// Stop the live output if active and return to `Idle`
    pub async fn stop(&self) {
        let task = self.health.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }

        {
            let mut guard = self.session.lock().await;
            if let Some(control) = guard.as_mut() {
                match control.output_active().await {
                    Ok(true) => match control.stop_output().await {
                        Ok(()) => info!("Live output stopped"),
                        Err(e) => warn!("Failed to stop live output: {}", e),
                    },
                    Ok(false) => debug!("Live output already inactive"),
                    Err(e) => {
                        warn!("Failed to query live output: {}", e);
                        guard.take();
                    }
                }
            }
        }

        // The platform binding is single-use
        self.binding.lock().take();
        self.set_state(BroadcastState::Idle);

        // Keeps the last watch URL in the row
        if let Some(status) = &self.status {
            if let Err(e) = status.set_live(false, None).await {
                warn!("Failed to clear live status: {}", e);
            }
        }
    }

    fn schedule_health_check(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.health_loop(token).await });

        let previous = self.health.lock().replace(HealthTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        debug!("Health check scheduled every {:?}", self.health_interval);
    }

    async fn health_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.state() != BroadcastState::Live {
                break;
            }

            match self.is_live().await {
                Ok(true) => debug!("Health check: live output active"),
                Ok(false) | Err(_) => {
                    warn!("Health check: live output dropped, restarting");
                    if let Err(e) = self.start_with_retries(&cancel).await {
                        error!("Health check restart failed: {}", e);
                        if let Some(events) = &self.events {
                            events.publish(SystemEvent::error("broadcast", e.to_string()));
                        }
                        break;
                    }
                }
            }
        }
        debug!("Health check stopped");
    }

    /// Log the broadcaster's scenes, items and inputs for diagnosis
    async fn dump_configuration(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let control = match self.connector.connect().await {
            Ok(control) => control,
            Err(e) => {
                debug!("Broadcaster configuration unavailable: {}", e);
                return;
            }
        };
        let mut control = control;
        match control.scene_names().await {
            Ok(scenes) => {
                for scene in scenes {
                    let items = control.scene_item_names(&scene).await.unwrap_or_default();
                    debug!("Scene '{}': items {:?}", scene, items);
                }
            }
            Err(e) => debug!("Failed to list scenes: {}", e),
        }
        match control.input_names().await {
            Ok(inputs) => debug!("Inputs: {:?}", inputs),
            Err(e) => debug!("Failed to list inputs: {}", e),
        }
    }
}

fn provision_step(step: &'static str) -> impl Fn(AppError) -> AppError {
    move |e| AppError::Provision {
        step: step.to_string(),
        reason: e.to_string(),
        retryable: e.is_retryable(),
    }
}
