//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// Serialized as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// An alert was classified and dispatched
    #[serde(rename = "alert.received")]
    AlertReceived {
        /// "raised" or "cleared"
        kind: String,
    },

    /// Recording session state transition
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        /// idle, opening, active, closing
        state: String,
        /// Local file of the current session, if any
        file: Option<String>,
    },

    /// Broadcast controller state transition
    #[serde(rename = "broadcast.state_changed")]
    BroadcastStateChanged {
        /// idle, provisioning, live
        state: String,
        /// Public watch URL while live
        url: Option<String>,
    },

    /// Persistence pipeline finished for a session
    #[serde(rename = "recording.persisted")]
    RecordingPersisted {
        file: String,
        /// Public URL, None when upload or verification failed
        url: Option<String>,
    },

    /// Non-fatal error surfaced to the operator
    #[serde(rename = "system.error")]
    SystemError {
        module: String,
        severity: String,
        message: String,
    },
}

impl SystemEvent {
    /// Event name as used in the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            Self::AlertReceived { .. } => "alert.received",
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::BroadcastStateChanged { .. } => "broadcast.state_changed",
            Self::RecordingPersisted { .. } => "recording.persisted",
            Self::SystemError { .. } => "system.error",
        }
    }

    pub fn error(module: &str, message: impl Into<String>) -> Self {
        Self::SystemError {
            module: module.to_string(),
            severity: "error".to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_shape() {
        let event = SystemEvent::SessionStateChanged {
            state: "active".to_string(),
            file: Some("recording_20240101_120000.mkv".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session.state_changed");
        assert_eq!(json["data"]["state"], "active");
        assert_eq!(event.name(), "session.state_changed");
    }
}
