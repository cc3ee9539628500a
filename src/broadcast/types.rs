//! Broadcast data types

use serde::{Deserialize, Serialize};

/// Broadcast controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    #[default]
    Idle,
    /// Provisioning or starting the output
    Provisioning,
    Live,
}

impl BroadcastState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::Live => "live",
        }
    }
}

impl std::fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Banner text shown on the annotated feed
pub fn status_text(state: BroadcastState, label: &str) -> String {
    match state {
        BroadcastState::Live => format!("Streaming: {}", label),
        BroadcastState::Idle | BroadcastState::Provisioning => "Recording...".to_string(),
    }
}

/// Settings forced onto the browser source that pulls the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Custom RTMP destination for the broadcaster's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamServiceSettings {
    pub server: String,
    pub key: String,
}

/// Result of the live-platform create/create/bind transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBinding {
    pub stream_id: String,
    pub broadcast_id: String,
    /// RTMP ingest address
    pub ingest_url: String,
    pub stream_key: String,
    /// Public URL viewers open
    pub watch_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(BroadcastState::Idle, "Security 24h"), "Recording...");
        assert_eq!(
            status_text(BroadcastState::Provisioning, "Security 24h"),
            "Recording..."
        );
        assert_eq!(
            status_text(BroadcastState::Live, "Security 24h"),
            "Streaming: Security 24h"
        );
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&BroadcastState::Provisioning).unwrap(),
            "\"provisioning\""
        );
    }
}
