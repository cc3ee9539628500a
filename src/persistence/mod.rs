//! Recording persistence
//!
//! Uploads finished recordings to object storage, writes the session log
//! and maintains the is-live status flag.

pub mod media;
pub mod metadata;
pub mod pipeline;
pub mod status;
pub mod storage;

pub use media::{FfmpegTool, MediaTool, ProbeInfo};
pub use metadata::{
    MetadataStore, PostgrestMetadataStore, SessionRecord, SqliteMetadataStore, StatusRecord,
};
pub use pipeline::{FinishedRecording, PersistencePipeline};
pub use status::StatusFlagStore;
pub use storage::{HttpVerifier, ObjectStorage, SupabaseStorage, UrlVerifier};
