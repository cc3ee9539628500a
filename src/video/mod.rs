//! Video capture, annotation and recording
//!
//! - [`source`]: frame source adapter over local V4L2 devices and network cameras
//! - [`annotate`]: overlay rendering for display frames
//! - [`sink`]: recording file writer
//! - [`jpeg`]: TurboJPEG codec for decoding MJPEG input and encoding relay frames

pub mod annotate;
pub mod frame;
pub mod jpeg;
pub mod network_source;
pub mod sink;
pub mod source;
pub mod v4l_source;

pub use annotate::{Annotator, FpsMeter};
pub use frame::{Frame, Resolution};
pub use jpeg::{JpegDecoder, JpegEncoder};
pub use sink::{FfmpegSinkFactory, SinkFactory, SinkSummary, VideoSink};
pub use source::{
    CaptureHandle, DeviceSourceFactory, FrameSource, FrameSourceAdapter, SourceCandidate,
    SourceFactory,
};
