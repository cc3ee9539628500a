//! Sentinel Recorder - alert-driven recording and live streaming
//!
//! An access-control alert starts a local recording of the annotated camera
//! feed and, in parallel, a public live broadcast of the same frames. The
//! matching clear alert stops both; the finished file is uploaded and logged.

pub mod alert;
pub mod broadcast;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod persistence;
pub mod recording;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{AppError, Result};
