//! Live frame distribution
//!
//! The relay hands the latest annotated frame from the recording worker to
//! HTTP multipart readers, including the broadcaster's browser source.

pub mod relay;

pub use relay::{create_mjpeg_part, FrameRelay, LiveFrame, BOUNDARY};
