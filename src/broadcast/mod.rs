//! Live broadcast control
//!
//! - [`obs`]: broadcaster control session (obs-websocket)
//! - [`youtube`]: optional public live-platform binding
//! - [`controller`]: provisioning, start/stop with retries and health check

pub mod controller;
pub mod obs;
pub mod types;
pub mod youtube;

pub use controller::BroadcastController;
pub use obs::{BroadcasterConnector, BroadcasterControl, ObsClient, ObsConnector};
pub use types::{status_text, BroadcastState, LiveBinding, SourceSettings, StreamServiceSettings};
pub use youtube::{LivePlatform, YouTubePlatform};
