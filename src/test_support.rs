//! In-memory stand-ins for the external collaborators, shared by unit tests

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::{Rgb, RgbImage};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::{
    BroadcasterConnector, BroadcasterControl, LiveBinding, LivePlatform, SourceSettings,
    StreamServiceSettings,
};
use crate::detection::{BBox, PersonDetector};
use crate::error::{AppError, PlatformError, Result};
use crate::persistence::{
    MediaTool, MetadataStore, ObjectStorage, ProbeInfo, SessionRecord, StatusRecord, UrlVerifier,
};
use crate::video::{FrameSource, Resolution, SinkFactory, SinkSummary, SourceCandidate, VideoSink};

const WAIT_LIMIT: Duration = Duration::from_secs(10);

// ============================================================================
// Broadcaster
// ============================================================================

#[derive(Default)]
struct BroadcasterState {
    scenes: BTreeMap<String, Vec<String>>,
    inputs: BTreeMap<String, SourceSettings>,
    program_scene: Option<String>,
    output_active: bool,
    start_calls: u32,
    failing_starts: u32,
    stream_service: Option<StreamServiceSettings>,
    service_at_start: Option<StreamServiceSettings>,
}

/// Observable broadcaster state
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcasterSnapshot {
    pub scenes: BTreeMap<String, Vec<String>>,
    pub inputs: BTreeMap<String, SourceSettings>,
    pub program_scene: Option<String>,
    pub output_active: bool,
    pub start_calls: u32,
    pub stream_service: Option<StreamServiceSettings>,
    /// Stream service in effect when the output last started
    pub service_at_start: Option<StreamServiceSettings>,
}

/// Scene graph and output flag of a broadcaster, shared by all its sessions
#[derive(Clone, Default)]
pub struct FakeBroadcaster {
    state: Arc<Mutex<BroadcasterState>>,
}

impl FakeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&self, name: &str, scene: &str, url: &str) {
        let mut state = self.state.lock();
        state.inputs.insert(
            name.to_string(),
            SourceSettings {
                url: url.to_string(),
                width: 640,
                height: 480,
                fps: 15,
            },
        );
        state
            .scenes
            .entry(scene.to_string())
            .or_default()
            .push(name.to_string());
    }

    /// The next `n` start requests fail
    pub fn fail_next_starts(&self, n: u32) {
        self.state.lock().failing_starts = n;
    }

    pub fn set_output_active(&self, active: bool) {
        self.state.lock().output_active = active;
    }

    pub fn snapshot(&self) -> BroadcasterSnapshot {
        let state = self.state.lock();
        BroadcasterSnapshot {
            scenes: state.scenes.clone(),
            inputs: state.inputs.clone(),
            program_scene: state.program_scene.clone(),
            output_active: state.output_active,
            start_calls: state.start_calls,
            stream_service: state.stream_service.clone(),
            service_at_start: state.service_at_start.clone(),
        }
    }
}

fn request_error(request: &str, reason: &str) -> AppError {
    AppError::BroadcasterRequest {
        request: request.to_string(),
        code: 600,
        reason: reason.to_string(),
    }
}

struct FakeControl {
    state: Arc<Mutex<BroadcasterState>>,
}

#[async_trait]
impl BroadcasterControl for FakeControl {
    async fn scene_names(&mut self) -> Result<Vec<String>> {
        Ok(self.state.lock().scenes.keys().cloned().collect())
    }

    async fn create_scene(&mut self, scene: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.scenes.contains_key(scene) {
            return Err(request_error("CreateScene", "scene exists"));
        }
        state.scenes.insert(scene.to_string(), Vec::new());
        Ok(())
    }

    async fn input_names(&mut self) -> Result<Vec<String>> {
        Ok(self.state.lock().inputs.keys().cloned().collect())
    }

    async fn remove_input(&mut self, input: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.inputs.remove(input).is_none() {
            return Err(request_error("RemoveInput", "no such input"));
        }
        for items in state.scenes.values_mut() {
            items.retain(|item| item != input);
        }
        Ok(())
    }

    async fn create_browser_input(
        &mut self,
        scene: &str,
        input: &str,
        settings: &SourceSettings,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.inputs.contains_key(input) {
            return Err(request_error("CreateInput", "input exists"));
        }
        let Some(items) = state.scenes.get_mut(scene) else {
            return Err(request_error("CreateInput", "no such scene"));
        };
        items.push(input.to_string());
        state.inputs.insert(input.to_string(), settings.clone());
        Ok(())
    }

    async fn scene_item_names(&mut self, scene: &str) -> Result<Vec<String>> {
        self.state
            .lock()
            .scenes
            .get(scene)
            .cloned()
            .ok_or_else(|| request_error("GetSceneItemList", "no such scene"))
    }

    async fn add_scene_item(&mut self, scene: &str, source: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.inputs.contains_key(source) {
            return Err(request_error("CreateSceneItem", "no such source"));
        }
        match state.scenes.get_mut(scene) {
            Some(items) => {
                items.push(source.to_string());
                Ok(())
            }
            None => Err(request_error("CreateSceneItem", "no such scene")),
        }
    }

    async fn set_program_scene(&mut self, scene: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.scenes.contains_key(scene) {
            return Err(request_error("SetCurrentProgramScene", "no such scene"));
        }
        state.program_scene = Some(scene.to_string());
        Ok(())
    }

    async fn output_active(&mut self) -> Result<bool> {
        Ok(self.state.lock().output_active)
    }

    async fn set_stream_service(&mut self, settings: &StreamServiceSettings) -> Result<()> {
        self.state.lock().stream_service = Some(settings.clone());
        Ok(())
    }

    async fn start_output(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.start_calls += 1;
        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            return Err(request_error("StartStream", "output failed to start"));
        }
        state.output_active = true;
        state.service_at_start = state.stream_service.clone();
        Ok(())
    }

    async fn stop_output(&mut self) -> Result<()> {
        self.state.lock().output_active = false;
        Ok(())
    }
}

pub struct FakeObsConnector {
    broadcaster: FakeBroadcaster,
    connections: AtomicUsize,
    reachable: AtomicBool,
    misconfigured: AtomicBool,
}

impl FakeObsConnector {
    pub fn new(broadcaster: FakeBroadcaster) -> Self {
        Self {
            broadcaster,
            connections: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
            misconfigured: AtomicBool::new(false),
        }
    }

    /// Connection attempts so far, failed ones included
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Connections fail like a broadcaster demanding an unset password
    pub fn set_misconfigured(&self, misconfigured: bool) {
        self.misconfigured.store(misconfigured, Ordering::SeqCst);
    }
}

#[async_trait]
impl BroadcasterConnector for FakeObsConnector {
    async fn connect(&self) -> Result<Box<dyn BroadcasterControl>> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        if self.misconfigured.load(Ordering::SeqCst) {
            return Err(AppError::Config(
                "Broadcaster requires a password but none is configured".into(),
            ));
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AppError::BroadcasterUnavailable("connection refused".into()));
        }
        Ok(Box::new(FakeControl {
            state: Arc::clone(&self.broadcaster.state),
        }))
    }
}

/// Live platform handing out one fixed binding, or failing every call
#[derive(Default)]
pub struct FakeLivePlatform {
    calls: AtomicUsize,
    failure: Option<PlatformError>,
}

impl FakeLivePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: PlatformError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: Some(error),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn binding() -> LiveBinding {
        LiveBinding {
            stream_id: "stream-1".into(),
            broadcast_id: "bcast-1".into(),
            ingest_url: "rtmp://a.rtmp.youtube.com/live2".into(),
            stream_key: "abcd-efgh".into(),
            watch_url: "https://www.youtube.com/watch?v=bcast-1".into(),
        }
    }
}

#[async_trait]
impl LivePlatform for FakeLivePlatform {
    async fn create_binding(&self) -> Result<LiveBinding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone().into()),
            None => Ok(Self::binding()),
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Default)]
struct Tables {
    sessions: Vec<SessionRecord>,
    status: Vec<StatusRecord>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn session_rows(&self) -> Vec<SessionRecord> {
        self.tables.lock().sessions.clone()
    }

    pub fn status_rows(&self) -> Vec<StatusRecord> {
        self.tables.lock().status.clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(AppError::Metadata("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        self.check_writable()?;
        self.tables.lock().sessions.push(record.clone());
        Ok(())
    }

    async fn sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        Ok(self
            .tables
            .lock()
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn latest_status(&self, user_id: &str) -> Result<Option<StatusRecord>> {
        Ok(self
            .tables
            .lock()
            .status
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn update_status(&self, id: i64, is_live: bool, live_url: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        let row = tables
            .status
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| AppError::Metadata(format!("no status row {}", id)))?;
        row.is_live = is_live;
        if let Some(url) = live_url {
            row.live_url = Some(url.to_string());
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_status(&self, user_id: &str, is_live: bool, live_url: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock();
        tables.next_id += 1;
        let id = tables.next_id;
        tables.status.push(StatusRecord {
            id,
            user_id: user_id.to_string(),
            is_live,
            live_url: live_url.map(str::to_string),
            updated_at: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct UploadLog {
    single: usize,
    chunked: usize,
    objects: Vec<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    log: Mutex<UploadLog>,
}

impl FakeStorage {
    pub fn single_uploads(&self) -> usize {
        self.log.lock().single
    }

    pub fn chunked_uploads(&self) -> usize {
        self.log.lock().chunked
    }

    pub fn total_calls(&self) -> usize {
        let log = self.log.lock();
        log.single + log.chunked
    }

    /// Object paths in upload order
    pub fn objects(&self) -> Vec<String> {
        self.log.lock().objects.clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(&self, object_path: &str, _data: Bytes, _content_type: &str) -> Result<()> {
        let mut log = self.log.lock();
        log.single += 1;
        log.objects.push(object_path.to_string());
        Ok(())
    }

    async fn put_object_chunked(
        &self,
        object_path: &str,
        file: &Path,
        size: u64,
        _content_type: &str,
        _chunk_size: u64,
    ) -> Result<()> {
        let on_disk = tokio::fs::metadata(file).await?.len();
        if on_disk != size {
            return Err(AppError::Storage(format!("size {} != {}", on_disk, size)));
        }
        let mut log = self.log.lock();
        log.chunked += 1;
        log.objects.push(object_path.to_string());
        Ok(())
    }

    fn public_url(&self, object_path: &str) -> String {
        format!("https://storage.test/public/{}", object_path)
    }
}

pub struct FakeVerifier {
    reachable: bool,
    calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UrlVerifier for FakeVerifier {
    async fn verify(&self, _url: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reachable)
    }
}

/// Probes as the given codec/frame count in an MP4 container unless told
/// otherwise; transcoding writes 2000 bytes
pub struct FakeMediaTool {
    codec: String,
    container: String,
    frames: u64,
    transcodes: AtomicUsize,
}

impl FakeMediaTool {
    pub fn new(codec: &str, frames: u64) -> Self {
        Self {
            codec: codec.to_string(),
            container: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            frames,
            transcodes: AtomicUsize::new(0),
        }
    }

    pub fn with_container(mut self, container: &str) -> Self {
        self.container = container.to_string();
        self
    }

    pub fn transcodes(&self) -> usize {
        self.transcodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn probe(&self, _path: &Path) -> Result<ProbeInfo> {
        Ok(ProbeInfo {
            codec: Some(self.codec.clone()),
            frames: self.frames,
            container: Some(self.container.clone()),
        })
    }

    async fn transcode(&self, _input: &Path, output: &Path) -> Result<()> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, vec![0u8; 2000]).await?;
        Ok(())
    }
}

// ============================================================================
// Video
// ============================================================================

/// Returns the same boxes for every frame
pub struct FakePersonDetector {
    boxes: Vec<BBox>,
}

impl FakePersonDetector {
    pub fn new(boxes: Vec<BBox>) -> Self {
        Self { boxes }
    }
}

impl PersonDetector for FakePersonDetector {
    fn detect_persons(&mut self, _frame: &RgbImage) -> Result<Vec<BBox>> {
        Ok(self.boxes.clone())
    }
}

#[derive(Default)]
struct SinkCounters {
    created: AtomicUsize,
    open_now: AtomicUsize,
    max_concurrent: AtomicUsize,
    finished: Mutex<Vec<SinkSummary>>,
}

/// Writes a few bytes per frame to a real file
#[derive(Default)]
pub struct FakeSinkFactory {
    counters: Arc<SinkCounters>,
}

impl FakeSinkFactory {
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.counters.open_now.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.counters.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> Vec<SinkSummary> {
        self.counters.finished.lock().clone()
    }
}

impl SinkFactory for FakeSinkFactory {
    fn create(&self, path: &Path, _resolution: Resolution, _fps: u32) -> Result<Box<dyn VideoSink>> {
        let file = std::fs::File::create(path)?;
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        let open = self.counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_concurrent.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeSink {
            file,
            path: path.to_path_buf(),
            frames: 0,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeSink {
    file: std::fs::File,
    path: PathBuf,
    frames: u64,
    counters: Arc<SinkCounters>,
}

impl VideoSink for FakeSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        writeln!(self.file, "frame {}x{}", frame.width(), frame.height())?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<SinkSummary> {
        self.file.flush()?;
        let summary = SinkSummary {
            path: self.path.clone(),
            frames_written: self.frames,
        };
        self.counters.finished.lock().push(summary.clone());
        Ok(summary)
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.counters.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct GateState {
    blocked: bool,
    released: bool,
}

/// Holds a source read until the test releases it
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    /// Resolves once the source is parked in a read
    pub async fn wait_for_blocked_read(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while !self.state.lock().blocked {
            assert!(Instant::now() < deadline, "source never blocked");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub fn release(&self) {
        self.state.lock().released = true;
        self.cond.notify_all();
    }

    fn block(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut state = self.state.lock();
        state.blocked = true;
        while !state.released && Instant::now() < deadline {
            self.cond.wait_for(&mut state, Duration::from_millis(50));
        }
    }
}

#[derive(Clone, Copy)]
enum Script {
    Unavailable,
    Endless,
    /// `n` frames, then the device disappears
    FailingAfter(u64),
    /// `n` frames, then block until released and fail
    Gated(u64),
}

pub struct ScriptedSourceFactory {
    script: Script,
    gate: Arc<Gate>,
    opens: AtomicUsize,
}

impl ScriptedSourceFactory {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            gate: Arc::new(Gate::default()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self::with_script(Script::Unavailable)
    }

    pub fn endless() -> Self {
        Self::with_script(Script::Endless)
    }

    pub fn failing_after(frames: u64) -> Self {
        Self::with_script(Script::FailingAfter(frames))
    }

    pub fn gated(frames: u64) -> (Self, Arc<Gate>) {
        let factory = Self::with_script(Script::Gated(frames));
        let gate = Arc::clone(&factory.gate);
        (factory, gate)
    }

    /// Successful opens
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl crate::video::SourceFactory for ScriptedSourceFactory {
    fn open(&self, candidate: &SourceCandidate) -> Result<Box<dyn FrameSource>> {
        if let Script::Unavailable = self.script {
            return Err(AppError::VideoError(format!("{} not present", candidate)));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            name: candidate.to_string(),
            script: self.script,
            gate: Arc::clone(&self.gate),
            delivered: AtomicU64::new(0),
        }))
    }
}

struct ScriptedSource {
    name: String,
    script: Script,
    gate: Arc<Gate>,
    delivered: AtomicU64,
}

impl ScriptedSource {
    fn next_frame(&self) -> RgbImage {
        let n = self.delivered.fetch_add(1, Ordering::SeqCst);
        RgbImage::from_pixel(64, 48, Rgb([(n % 255) as u8, 80, 120]))
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        let delivered = self.delivered.load(Ordering::SeqCst);
        match self.script {
            Script::Endless => Ok(self.next_frame()),
            Script::FailingAfter(limit) | Script::Gated(limit) if delivered < limit => {
                Ok(self.next_frame())
            }
            Script::FailingAfter(_) => Err(AppError::VideoDeviceLost {
                device: self.name.clone(),
                reason: "unplugged".into(),
            }),
            Script::Gated(_) => {
                self.gate.block();
                Err(AppError::VideoError("source released".into()))
            }
            Script::Unavailable => Err(AppError::VideoError("not open".into())),
        }
    }
}
