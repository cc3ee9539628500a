use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Identity written into every status flag and session record
    pub device: DeviceConfig,
    /// MQTT alert subscription
    pub alert: AlertConfig,
    /// Capture sources
    pub camera: CameraConfig,
    /// Person/face detection
    pub detection: DetectionConfig,
    /// Overlay rendering
    pub annotation: AnnotationConfig,
    /// Local recording output
    pub recording: RecordingConfig,
    /// Frame relay HTTP server
    pub relay: RelayConfig,
    /// OBS websocket broadcaster
    pub broadcaster: BroadcasterConfig,
    /// YouTube live platform binding
    pub live_platform: LivePlatformConfig,
    /// Object storage for finished recordings
    pub storage: StorageConfig,
    /// Session log and live status tables
    pub metadata: MetadataConfig,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// User the recordings and the live flag belong to
    pub user_id: String,
    /// Camera/controller identifier stored in session records
    pub device_id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            user_id: "1".to_string(),
            device_id: "ESP32_CAM_01".to_string(),
        }
    }
}

/// Alert ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Broker host name (None disables alert ingest)
    pub broker_host: Option<String>,
    pub broker_port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    /// Case-insensitive phrase that starts a session
    pub raise_phrase: String,
    /// Case-insensitive phrase that ends a session
    pub clear_phrase: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            broker_host: None,
            broker_port: 8883,
            use_tls: true,
            username: None,
            password: None,
            topic: "alert".to_string(),
            raise_phrase: "acesso negado".to_string(),
            clear_phrase: "alerta cancelado, acesso liberado".to_string(),
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

/// Capture source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Local V4L2 device indices, tried in order
    pub device_indices: Vec<u32>,
    /// Network camera MJPEG URL used when no local device opens
    pub network_url: Option<String>,
    pub network_username: Option<String>,
    pub network_password: Option<String>,
    /// Normalized frame width
    pub width: u32,
    /// Normalized frame height
    pub height: u32,
    /// Target loop rate
    pub fps: u32,
    /// Full passes over the source list before a session start fails
    pub open_attempts: u32,
    /// Consecutive read failures that end an active session
    pub max_consecutive_failures: u32,
    pub read_timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_indices: (0..6).collect(),
            network_url: None,
            network_username: None,
            network_password: None,
            width: 1280,
            height: 720,
            fps: 30,
            open_attempts: 2,
            max_consecutive_failures: 5,
            read_timeout_secs: 5,
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// YOLOv8 person model (ONNX)
    pub person_model: Option<String>,
    /// YOLOv8-face model (ONNX)
    pub face_model: Option<String>,
    pub person_confidence: f32,
    pub face_confidence: f32,
    pub iou_threshold: f32,
    /// Model input edge length
    pub input_size: u32,
    /// Run detection every N frames
    pub duty_cycle: u32,
    /// Margin around a detected face before cropping
    pub face_margin: u32,
    /// Face close-up edge length
    pub inset_size: u32,
    pub inset_x: u32,
    pub inset_y: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            person_model: None,
            face_model: None,
            person_confidence: 0.6,
            face_confidence: 0.5,
            iou_threshold: 0.45,
            input_size: 640,
            duty_cycle: 2,
            face_margin: 30,
            inset_size: 200,
            inset_x: 1060,
            inset_y: 20,
        }
    }
}

/// Overlay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnotationConfig {
    /// TrueType font for labels; labels are skipped when it cannot be loaded
    pub font_path: Option<String>,
    /// Label shown after "Streaming: " while live
    pub stream_label: String,
    pub banner_height: u32,
    pub banner_alpha: f32,
    /// JPEG quality of relayed frames (1-100)
    pub jpeg_quality: u32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            font_path: Some("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()),
            stream_label: "Security 24h".to_string(),
            banner_height: 40,
            banner_alpha: 0.4,
            jpeg_quality: 80,
        }
    }
}

/// Recording output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    /// Recordings directory (relative paths are rebased under the data dir)
    pub directory: String,
    /// chrono format string for file names
    pub file_pattern: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: "recordings".to_string(),
            file_pattern: "recording_%Y%m%d_%H%M%S.mkv".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

/// Relay HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Host the broadcaster uses to reach the relay
    pub public_host: String,
    pub path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            public_host: "localhost".to_string(),
            path: "/video_feed".to_string(),
        }
    }
}

impl RelayConfig {
    /// URL of the relay stream as seen by the broadcaster
    pub fn stream_url(&self) -> String {
        format!("http://{}:{}{}", self.public_host, self.port, self.path)
    }
}

/// OBS websocket broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcasterConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub scene: String,
    pub source: String,
    /// Raw RTMP target used when no live platform token is configured
    pub rtmp_server: Option<String>,
    pub stream_key: Option<String>,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,
    pub provision_attempts: u32,
    pub provision_backoff_secs: u64,
    pub start_attempts: u32,
    pub start_backoff_secs: u64,
    pub request_timeout_secs: u64,
    pub health_check_interval_secs: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 4455,
            password: None,
            scene: "Detecção".to_string(),
            source: "Camera_Seguranca".to_string(),
            rtmp_server: None,
            stream_key: None,
            connect_attempts: 5,
            connect_backoff_secs: 3,
            provision_attempts: 3,
            provision_backoff_secs: 1,
            start_attempts: 3,
            start_backoff_secs: 2,
            request_timeout_secs: 10,
            health_check_interval_secs: 60,
        }
    }
}

/// YouTube live platform configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivePlatformConfig {
    /// OAuth access token with the youtube.force-ssl scope (None disables binding)
    pub access_token: Option<String>,
    pub api_base: String,
    pub title: String,
    pub description: String,
    pub privacy_status: String,
    pub timeout_secs: u64,
}

impl Default for LivePlatformConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            title: "Security camera".to_string(),
            description: "Live feed triggered by an access alert".to_string(),
            privacy_status: "public".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Object storage configuration (Supabase Storage)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub bucket: String,
    /// Object path prefix; objects land at `<prefix>/<user_id>/<file_name>`
    pub path_prefix: String,
    pub chunk_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
    pub cache_control: String,
    pub upload_timeout_secs: u64,
    pub verify_timeout_secs: u64,
    /// Codecs accepted without transcoding
    pub compatible_codecs: Vec<String>,
    /// Containers (ffprobe format names) accepted without transcoding
    pub compatible_containers: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            bucket: "filmagens".to_string(),
            path_prefix: "recordings".to_string(),
            chunk_threshold_bytes: 5 * 1024 * 1024,
            chunk_size_bytes: 5 * 1024 * 1024,
            cache_control: "3600".to_string(),
            upload_timeout_secs: 300,
            verify_timeout_secs: 10,
            compatible_codecs: vec!["h264".to_string()],
            compatible_containers: vec!["mp4".to_string()],
        }
    }
}

/// Metadata backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// Local SQLite tables next to the config database
    #[default]
    Sqlite,
    /// Supabase PostgREST tables
    Postgrest,
}

/// Metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    pub backend: MetadataBackend,
    /// Local SQLite tables
    pub sessions_table: String,
    pub status_table: String,
    /// PostgREST tables shared with the companion app
    pub remote_sessions_table: String,
    pub remote_status_table: String,
    /// Event label written into every session record
    pub event_label: String,
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::Sqlite,
            sessions_table: "recording_sessions".to_string(),
            status_table: "live_status".to_string(),
            remote_sessions_table: "Tb_Filmagens".to_string(),
            remote_status_table: "ngrok_links".to_string(),
            event_label: "access denied".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Override secrets from the environment
    pub fn apply_env_overrides(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(v) = var("OBS_WS_PASSWORD") {
            self.broadcaster.password = Some(v);
        }
        if let Some(v) = var("SUPABASE_URL") {
            self.storage.url = Some(v);
        }
        if let Some(v) = var("SUPABASE_KEY") {
            self.storage.api_key = Some(v);
        }
        if let Some(v) = var("MQTT_CLUSTER_URL") {
            self.alert.broker_host = Some(v);
        }
        if let Some(v) = var("MQTT_USERNAME") {
            self.alert.username = Some(v);
        }
        if let Some(v) = var("MQTT_PASSWORD") {
            self.alert.password = Some(v);
        }
        if let Some(v) = var("YOUTUBE_ACCESS_TOKEN") {
            self.live_platform.access_token = Some(v);
        }
        if let Some(v) = var("YOUTUBE_STREAM_KEY") {
            self.broadcaster.stream_key = Some(v);
        }
    }

    /// Whether object storage credentials are present
    pub fn storage_configured(&self) -> bool {
        self.storage.url.is_some() && self.storage.api_key.is_some()
    }

    /// Features disabled by missing configuration, for startup logging
    pub fn disabled_features(&self) -> Vec<String> {
        let mut disabled = Vec::new();
        if self.alert.broker_host.is_none() {
            disabled.push("alert ingest (no MQTT broker configured)".to_string());
        }
        if !self.broadcaster.enabled {
            disabled.push("live streaming (broadcaster disabled)".to_string());
        } else if self.live_platform.access_token.is_none()
            && (self.broadcaster.rtmp_server.is_none() || self.broadcaster.stream_key.is_none())
        {
            disabled.push(
                "live platform binding (no access token; using broadcaster stream settings)"
                    .to_string(),
            );
        }
        if !self.storage_configured() {
            disabled.push("recording upload (no storage URL/key)".to_string());
        }
        if self.metadata.backend == MetadataBackend::Postgrest && !self.storage_configured() {
            disabled.push("remote metadata (PostgREST needs the storage URL/key)".to_string());
        }
        if self.camera.device_indices.is_empty() && self.camera.network_url.is_none() {
            disabled.push("capture (no local device indices and no network camera)".to_string());
        }
        disabled
    }
}
