//! Alert-driven recording sessions
//!
//! - [`controller`]: single-session state machine and worker lifecycle
//! - [`worker`]: the blocking capture/annotate/encode loop
//! - [`session`]: session record and states

pub mod controller;
pub mod session;
pub mod worker;

pub use controller::RecordingController;
pub use session::{Session, SessionState, StopReason};
pub use worker::{SessionResources, WorkerSettings};
