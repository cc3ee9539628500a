use std::sync::Arc;

use crate::broadcast::BroadcastController;
use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::recording::RecordingController;
use crate::stream::FrameRelay;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Latest annotated frame, fanned out to relay viewers
    pub relay: Arc<FrameRelay>,
    /// Alert-driven recording session controller
    pub recorder: Arc<RecordingController>,
    /// Live output controller (None in record-only mode)
    pub broadcast: Option<Arc<BroadcastController>>,
    /// Event bus for status notifications
    pub events: Arc<EventBus>,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        relay: Arc<FrameRelay>,
        recorder: Arc<RecordingController>,
        broadcast: Option<Arc<BroadcastController>>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            relay,
            recorder,
            broadcast,
            events,
        })
    }
}
