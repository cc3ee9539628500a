//! Recording session types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Session controller state
///
/// `Idle -> Opening -> Active -> Closing -> Idle`, with `Opening -> Idle`
/// when the source or sink cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Opening,
    Active,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Alert cleared
    Cleared,
    /// Capture failed repeatedly or the device disappeared
    DeviceLost,
    /// The recording file could not be written
    SinkFailed,
    /// Source or sink never opened
    OpenFailed,
    Shutdown,
}

/// One alert-triggered recording
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: String,
    pub device_id: String,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub frames_written: u64,
    pub size_bytes: Option<u64>,
    pub url: Option<String>,
    pub stop_reason: Option<StopReason>,
}

impl Session {
    pub fn new(user_id: &str, device_id: &str, path: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            path,
            started_at,
            ended_at: None,
            frames_written: 0,
            size_bytes: None,
            url: None,
            stop_reason: None,
        }
    }

    /// Whole seconds between start and end; `None` while open
    pub fn duration_secs(&self) -> Option<i64> {
        self.ended_at.map(|end| (end - self.started_at).num_seconds())
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}
