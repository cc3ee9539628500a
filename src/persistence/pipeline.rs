//! Post-recording pipeline
//!
//! validate -> normalize -> upload -> verify -> record. A failure before the
//! record step leaves the local file untouched and writes no metadata.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::media::{converted_path, MediaTool, ProbeInfo};
use super::metadata::{MetadataStore, SessionRecord};
use super::storage::{ObjectStorage, UrlVerifier};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// A closed recording handed over by the session controller
#[derive(Debug, Clone)]
pub struct FinishedRecording {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

pub struct PersistencePipeline {
    media: Arc<dyn MediaTool>,
    storage: Option<Arc<dyn ObjectStorage>>,
    verifier: Arc<dyn UrlVerifier>,
    metadata: Arc<dyn MetadataStore>,
    user_id: String,
    device_id: String,
    event_label: String,
    path_prefix: String,
    chunk_threshold: u64,
    chunk_size: u64,
    compatible_codecs: Vec<String>,
    compatible_containers: Vec<String>,
    events: Option<Arc<EventBus>>,
}

impl PersistencePipeline {
    pub fn new(
        config: &AppConfig,
        media: Arc<dyn MediaTool>,
        storage: Option<Arc<dyn ObjectStorage>>,
        verifier: Arc<dyn UrlVerifier>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            media,
            storage,
            verifier,
            metadata,
            user_id: config.device.user_id.clone(),
            device_id: config.device.device_id.clone(),
            event_label: config.metadata.event_label.clone(),
            path_prefix: config.storage.path_prefix.trim_matches('/').to_string(),
            chunk_threshold: config.storage.chunk_threshold_bytes,
            chunk_size: config.storage.chunk_size_bytes,
            compatible_codecs: config
                .storage
                .compatible_codecs
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
            compatible_containers: config
                .storage
                .compatible_containers
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Deterministic object path for a local file
    pub fn object_path(&self, file: &Path) -> String {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());
        if self.path_prefix.is_empty() {
            format!("{}/{}", self.user_id, name)
        } else {
            format!("{}/{}/{}", self.path_prefix, self.user_id, name)
        }
    }

    /// Reject missing, empty or frameless files
    async fn validate(&self, path: &Path) -> Result<ProbeInfo> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| AppError::Validation(format!("{}: {}", path.display(), e)))?;
        if meta.len() == 0 {
            return Err(AppError::Validation(format!("{} is empty", path.display())));
        }

        let probe = self.media.probe(path).await?;
        if probe.frames == 0 {
            return Err(AppError::Validation(format!(
                "{} contains no video frames",
                path.display()
            )));
        }
        debug!(
            "Validated {}: {} frames, codec {:?}, container {:?}",
            path.display(),
            probe.frames,
            probe.codec,
            probe.container
        );
        Ok(probe)
    }

    /// Codec and container must both be in the accepted sets
    ///
    /// ffprobe reports demuxer aliases as a list (`mov,mp4,m4a,...`), so any
    /// listed name counts.
    fn is_upload_compatible(&self, probe: &ProbeInfo) -> bool {
        let codec_ok = probe
            .codec
            .as_ref()
            .is_some_and(|c| self.compatible_codecs.contains(&c.to_lowercase()));
        let container_ok = probe.container.as_ref().is_some_and(|names| {
            names
                .split(',')
                .any(|n| self.compatible_containers.contains(&n.trim().to_lowercase()))
        });
        codec_ok && container_ok
    }

    /// Upload a recording and return its verified public URL
    ///
    /// `Ok(None)` means the object was stored but is not reachable.
    pub async fn upload(&self, local_path: &Path) -> Result<Option<String>> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| AppError::Config("Object storage is not configured".into()))?;

        let probe = self.validate(local_path).await?;

        let upload_path = if self.is_upload_compatible(&probe) {
            local_path.to_path_buf()
        } else {
            let output = converted_path(local_path);
            self.media.transcode(local_path, &output).await?;
            output
        };

        let size = tokio::fs::metadata(&upload_path).await?.len();
        let object_path = self.object_path(&upload_path);
        let content_type = content_type_for(&upload_path);

        if size > self.chunk_threshold {
            info!(
                "Uploading {} ({} bytes) in {} byte chunks",
                object_path, size, self.chunk_size
            );
            storage
                .put_object_chunked(&object_path, &upload_path, size, content_type, self.chunk_size)
                .await?;
        } else {
            info!("Uploading {} ({} bytes)", object_path, size);
            let data = tokio::fs::read(&upload_path).await?;
            storage
                .put_object(&object_path, Bytes::from(data), content_type)
                .await?;
        }

        let url = format!(
            "{}?t={}",
            storage.public_url(&object_path),
            Utc::now().timestamp()
        );
        match self.verifier.verify(&url).await {
            Ok(true) => {
                info!("Recording available at {}", url);
                Ok(Some(url))
            }
            Ok(false) => {
                warn!("Uploaded object is not reachable: {}", url);
                Ok(None)
            }
            Err(e) => {
                warn!("Failed to verify {}: {}", url, e);
                Ok(None)
            }
        }
    }

    pub async fn record_session(&self, record: &SessionRecord) -> Result<()> {
        self.metadata.insert_session(record).await
    }

    /// Run the whole pipeline for one session, logging every failure
    pub async fn persist(&self, recording: FinishedRecording) -> Option<String> {
        let file = recording.path.display().to_string();

        let url = match self.upload(&recording.path).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => None,
            Err(e) => {
                error!("Persisting {} failed, file kept on disk: {}", file, e);
                if let Some(events) = &self.events {
                    events.publish(SystemEvent::error("persistence", e.to_string()));
                }
                None
            }
        };

        if let Some(url) = &url {
            let size = self.uploaded_size(&recording.path).await;
            let record = SessionRecord::new(
                &self.user_id,
                &self.device_id,
                &self.event_label,
                recording.started_at,
                recording.ended_at,
                url,
                size,
            );
            match self.record_session(&record).await {
                Ok(()) => info!("Session recorded ({}s, {} MB)", record.duration_secs, record.size_mb),
                Err(e) => error!("Failed to record session metadata for {}: {}", url, e),
            }
        }

        if let Some(events) = &self.events {
            events.publish(SystemEvent::RecordingPersisted {
                file,
                url: url.clone(),
            });
        }
        url
    }

    async fn uploaded_size(&self, original: &Path) -> u64 {
        let converted = converted_path(original);
        for path in [converted.as_path(), original] {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                return meta.len();
            }
        }
        0
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeMediaTool, FakeStorage, FakeVerifier, MemoryMetadataStore};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        dir: tempfile::TempDir,
        media: Arc<FakeMediaTool>,
        storage: Arc<FakeStorage>,
        verifier: Arc<FakeVerifier>,
        metadata: Arc<MemoryMetadataStore>,
        pipeline: PersistencePipeline,
    }

    fn harness(head_status_ok: bool, codec: &str, frames: u64) -> Harness {
        harness_with(head_status_ok, FakeMediaTool::new(codec, frames))
    }

    fn harness_with(head_status_ok: bool, media: FakeMediaTool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let media = Arc::new(media);
        let storage = Arc::new(FakeStorage::default());
        let verifier = Arc::new(FakeVerifier::new(head_status_ok));
        let metadata = Arc::new(MemoryMetadataStore::default());

        let mut config = AppConfig::default();
        config.storage.chunk_threshold_bytes = 1024;
        config.storage.chunk_size_bytes = 512;

        let pipeline = PersistencePipeline::new(
            &config,
            media.clone(),
            Some(storage.clone()),
            verifier.clone(),
            metadata.clone(),
        );
        Harness {
            dir,
            media,
            storage,
            verifier,
            metadata,
            pipeline,
        }
    }

    fn recording(path: PathBuf) -> FinishedRecording {
        let ended_at = Utc::now();
        FinishedRecording {
            path,
            started_at: ended_at - ChronoDuration::seconds(42),
            ended_at,
        }
    }

    #[tokio::test]
    async fn test_head_404_returns_none_without_metadata() {
        let h = harness(false, "h264", 10);
        let path = h.dir.path().join("clip.mp4");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        assert_eq!(h.pipeline.upload(&path).await.unwrap(), None);
        assert_eq!(h.storage.single_uploads(), 1);

        assert_eq!(h.pipeline.persist(recording(path)).await, None);
        assert!(h.metadata.session_rows().is_empty());
        assert_eq!(h.verifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_byte_file_never_uploaded() {
        let h = harness(true, "h264", 10);
        let path = h.dir.path().join("empty.mp4");
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(
            h.pipeline.upload(&path).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(h.pipeline.persist(recording(path.clone())).await, None);
        assert_eq!(h.storage.total_calls(), 0);
        assert!(h.metadata.session_rows().is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_zero_frame_file_never_uploaded() {
        let h = harness(true, "h264", 0);
        let path = h.dir.path().join("frameless.mp4");
        std::fs::write(&path, vec![7u8; 100]).unwrap();

        assert!(h.pipeline.persist(recording(path)).await.is_none());
        assert_eq!(h.storage.total_calls(), 0);
        assert_eq!(h.media.transcodes(), 0);
    }

    #[tokio::test]
    async fn test_incompatible_codec_is_transcoded_and_chunked() {
        let h = harness(true, "mpeg4", 3);
        let path = h.dir.path().join("recording_20240101_120000.mkv");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        let url = h.pipeline.persist(recording(path)).await.unwrap();

        assert_eq!(h.media.transcodes(), 1);
        // Fake transcode writes 2000 bytes, above the 1024 byte threshold
        assert_eq!(h.storage.chunked_uploads(), 1);
        assert_eq!(h.storage.single_uploads(), 0);
        assert_eq!(
            h.storage.objects(),
            vec!["recordings/1/recording_20240101_120000.converted.mp4".to_string()]
        );
        assert!(url.contains("?t="));

        let rows = h.metadata.session_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_secs, 42);
        assert_eq!(rows[0].url, url);
        assert_eq!(rows[0].device_id, "ESP32_CAM_01");
    }

    #[tokio::test]
    async fn test_h264_in_matroska_is_normalized() {
        let h = harness_with(
            true,
            FakeMediaTool::new("h264", 3).with_container("matroska,webm"),
        );
        let path = h.dir.path().join("recording_20240101_000000.mkv");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        assert!(h.pipeline.upload(&path).await.unwrap().is_some());
        assert_eq!(h.media.transcodes(), 1);
        assert_eq!(
            h.storage.objects(),
            vec!["recordings/1/recording_20240101_000000.converted.mp4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_h264_in_mp4_uploaded_as_is() {
        let h = harness(true, "h264", 3);
        let path = h.dir.path().join("clip.mp4");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        assert!(h.pipeline.upload(&path).await.unwrap().is_some());
        assert_eq!(h.media.transcodes(), 0);
        assert_eq!(h.storage.objects(), vec!["recordings/1/clip.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_url() {
        let h = harness(true, "h264", 3);
        h.metadata.fail_writes(true);
        let path = h.dir.path().join("clip.mp4");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        assert!(h.pipeline.persist(recording(path)).await.is_some());
        assert_eq!(h.storage.single_uploads(), 1);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.mkv")), "video/x-matroska");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
