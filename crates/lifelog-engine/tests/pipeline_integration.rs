use lifelog_core::config::NodeConfig;
use lifelog_core::manifest::{ItemType, UploadStatus};
use lifelog_core::wav;
use lifelog_engine::audio::AudioMachine;
use lifelog_engine::platform::{
    Camera, Clock, HttpClient, HttpError, HttpResponse, MemoryStateStore, Microphone, NetLink,
    StorageUsage,
};
use lifelog_engine::scheduler::{Node, NodeContext, Platform};
use lifelog_engine::store::ArtifactStore;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::rc::Rc;

struct ScriptedMic {
    frames: VecDeque<Vec<i16>>,
}

impl ScriptedMic {
    fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    fn feed(&mut self, amplitude: i16, frames: usize) {
        for _ in 0..frames {
            self.frames.push_back(vec![amplitude; 320]);
        }
    }
}

impl Microphone for ScriptedMic {
    fn read_frame(&mut self, frame: &mut [i16]) -> io::Result<usize> {
        let Some(next) = self.frames.pop_front() else {
            return Ok(0);
        };
        let count = next.len().min(frame.len());
        frame[..count].copy_from_slice(&next[..count]);
        Ok(count)
    }
}

struct IdleMic;
impl Microphone for IdleMic {
    fn read_frame(&mut self, _frame: &mut [i16]) -> io::Result<usize> {
        Ok(0)
    }
}

struct FixedClock {
    wall_epoch: u64,
}
impl Clock for FixedClock {
    fn uptime_ms(&self) -> u64 {
        0
    }
    fn wall_epoch(&self) -> u64 {
        self.wall_epoch
    }
}

struct OneShotCamera;
impl Camera for OneShotCamera {
    fn capture_jpeg(&mut self) -> io::Result<Vec<u8>> {
        Ok(b"\xff\xd8jpegbody\xff\xd9".to_vec())
    }
}

#[derive(Clone, Default)]
struct HttpLog {
    posts: Rc<RefCell<Vec<(String, Value)>>>,
    puts: Rc<RefCell<Vec<(String, u16, String, String)>>>,
}

struct ScriptedHttp {
    log: HttpLog,
    post_responses: RefCell<VecDeque<HttpResponse>>,
    put_responses: RefCell<VecDeque<u16>>,
}

impl ScriptedHttp {
    fn new(log: HttpLog) -> Self {
        Self {
            log,
            post_responses: RefCell::new(VecDeque::new()),
            put_responses: RefCell::new(VecDeque::new()),
        }
    }

    fn push_post(&self, status: u16, body: &str) {
        self.post_responses.borrow_mut().push_back(HttpResponse {
            status,
            body: body.to_string(),
        });
    }

    fn push_put(&self, status: u16) {
        self.put_responses.borrow_mut().push_back(status);
    }
}

impl HttpClient for ScriptedHttp {
    fn post_json(
        &mut self,
        path: &str,
        _token: &str,
        body: &Value,
    ) -> Result<HttpResponse, HttpError> {
        self.log
            .posts
            .borrow_mut()
            .push((path.to_string(), body.clone()));
        self.post_responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| HttpError::Connect("no scripted response".to_string()))
    }

    fn put_file(
        &mut self,
        host: &str,
        port: u16,
        path: &str,
        content_type: &str,
        _file: &Path,
    ) -> Result<u16, HttpError> {
        self.log.puts.borrow_mut().push((
            host.to_string(),
            port,
            path.to_string(),
            content_type.to_string(),
        ));
        self.put_responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| HttpError::Connect("no scripted response".to_string()))
    }
}

struct StaticNet {
    wifi: bool,
    ntp: bool,
}
impl NetLink for StaticNet {
    fn connect_wifi(&mut self, _timeout_ms: u64) -> bool {
        self.wifi
    }
    fn sync_ntp(&mut self, _timeout_ms: u64) -> bool {
        self.ntp
    }
    fn rssi(&self) -> i32 {
        -55
    }
}

struct RoomyDisk;
impl StorageUsage for RoomyDisk {
    fn total_bytes(&self) -> u64 {
        1_000_000_000
    }
    fn used_bytes(&self) -> u64 {
        0
    }
}

fn open_store(dir: &Path) -> ArtifactStore {
    ArtifactStore::open(dir, Box::<MemoryStateStore>::default()).expect("open store")
}

fn read_clip_samples(store: &ArtifactStore, filepath: &str) -> Vec<i16> {
    let bytes = std::fs::read(store.abs_path(filepath)).expect("read clip");
    let header = wav::decode_header(&bytes).expect("wav header");
    let samples = wav::decode_samples(&bytes[wav::HEADER_LEN..]);
    assert_eq!(header.data_bytes as usize, samples.len() * 2);
    samples
}

/// Cold boot on an empty disk with no network: one photo lands under
/// `unsynced/` with a zeroed, PENDING manifest.
#[test]
fn boot_on_empty_disk_writes_unsynced_photo_and_manifest() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = open_store(tmp.path());
    let platform = Platform {
        clock: Box::new(FixedClock { wall_epoch: 0 }),
        camera: Box::new(OneShotCamera),
        mic: Box::new(IdleMic),
        http: Box::new(ScriptedHttp::new(HttpLog::default())),
        net: Box::new(StaticNet {
            wifi: false,
            ntp: false,
        }),
        usage: Box::new(RoomyDisk),
    };
    let ctx = NodeContext {
        camera_ok: true,
        audio_ok: true,
        ..NodeContext::default()
    };
    let mut node = Node::new(NodeConfig::default(), ctx, Some(store), platform);
    node.boot();

    let store = node.store().expect("store");
    assert!(store.artifact_exists("/unsynced/img_0.jpg"));
    let manifest = store
        .load_manifest(&store.manifest_path(0))
        .expect("manifest 0");
    assert_eq!(manifest.filepath, "/unsynced/img_0.jpg");
    assert_eq!(manifest.seq, 0);
    assert_eq!(manifest.status, UploadStatus::Pending);
    assert_eq!(manifest.item_type, ItemType::Photo);
    assert_eq!(manifest.content_type, "image/jpeg");
    assert_eq!(manifest.captured_at_epoch, 0);
    assert_eq!(manifest.upload_attempts, 0);
    assert_eq!(manifest.last_attempt_epoch, 0);
}

/// The VAD scenario: a settled noise floor near 1000, then loud frames.
/// The fourth loud frame starts a recording whose head is the preroll
/// ring, followed by the trigger frame itself.
#[test]
fn vad_recording_starts_on_fourth_loud_frame_with_preroll_head() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut store = open_store(tmp.path());
    let mut machine = AudioMachine::new(NodeConfig::default().audio);
    let mut mic = ScriptedMic::new();

    mic.feed(1_000, 100);
    mic.feed(10_000, 4);
    while !mic.frames.is_empty() {
        machine.tick(&mut mic, &mut store, None, false);
    }
    assert!(machine.is_recording(), "4th loud frame must trigger");

    mic.feed(10_000, 6);
    mic.feed(1_000, 50); // 50 under-frames end the clip
    while !mic.frames.is_empty() {
        machine.tick(&mut mic, &mut store, None, false);
    }
    assert!(!machine.is_recording());

    let pending = store
        .iter_manifests(UploadStatus::Pending)
        .expect("iter pending");
    assert_eq!(pending.len(), 1);
    let manifest = &pending[0].manifest;
    assert_eq!(manifest.item_type, ItemType::Audio);

    let samples = read_clip_samples(&store, &manifest.filepath);
    // preroll + trigger + 6 loud + 50 quiet frames
    assert_eq!(samples.len(), 16_000 + 320 + 6 * 320 + 50 * 320);
    // The ring head is quiet audio; its tail and the trigger frame are loud.
    assert_eq!(samples[0], 1_000);
    assert_eq!(samples[15_999], 10_000);
    assert!(samples[16_000..16_320].iter().all(|&s| s == 10_000));
}

/// Happy-path upload through the scheduler: upload-url, streamed PUT and
/// ingest all succeed, the manifest turns UPLOADED with one attempt.
#[test]
fn upload_batch_marks_boot_photo_uploaded() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = open_store(tmp.path());
    let log = HttpLog::default();
    let http = ScriptedHttp::new(log.clone());
    http.push_post(
        200,
        r#"{"upload_host":"s3.test","upload_port":443,"upload_path":"/bucket/k","object_key":"k"}"#,
    );
    http.push_put(200);
    http.push_post(200, r#"{"status":"ok"}"#);

    let mut cfg = NodeConfig::default();
    cfg.upload.device_token = "token-1".to_string();
    let platform = Platform {
        clock: Box::new(FixedClock {
            wall_epoch: 1_709_288_102,
        }),
        camera: Box::new(OneShotCamera),
        mic: Box::new(IdleMic),
        http: Box::new(http),
        net: Box::new(StaticNet {
            wifi: true,
            ntp: true,
        }),
        usage: Box::new(RoomyDisk),
    };
    let ctx = NodeContext {
        camera_ok: true,
        audio_ok: true,
        ..NodeContext::default()
    };
    let mut node = Node::new(cfg, ctx, Some(store), platform);
    node.boot();
    assert!(node.context().wifi_ok);
    assert!(node.context().ntp_synced);

    node.cycle_at(15_000);

    let store = node.store().expect("store");
    let manifest = store
        .load_manifest(&store.manifest_path(0))
        .expect("manifest 0");
    assert_eq!(manifest.status, UploadStatus::Uploaded);
    assert_eq!(manifest.upload_attempts, 1);

    let posts = log.posts.borrow();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].0, "/devices/upload-url");
    assert_eq!(posts[1].0, "/devices/ingest");
    assert_eq!(posts[1].1["object_key"], "k");
    assert_eq!(posts[1].1["ntp_synced"], true);
    // The boot photo predates the sync, so it carries no wall timestamp.
    assert!(posts[1].1.get("captured_at").is_none());
    let puts = log.puts.borrow();
    assert_eq!(
        puts.as_slice(),
        &[(
            "s3.test".to_string(),
            443,
            "/bucket/k".to_string(),
            "image/jpeg".to_string()
        )]
    );
}

/// A photo-triggered clip records preroll plus nine seconds and stamps the
/// manifest one preroll-second before the photo epoch.
#[test]
fn photo_clip_stops_at_preroll_plus_post_duration() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut store = open_store(tmp.path());
    let mut machine = AudioMachine::new(NodeConfig::default().audio);
    let mut mic = ScriptedMic::new();

    // Fill the 16000-sample ring, then force the clip.
    mic.feed(200, 50);
    while !mic.frames.is_empty() {
        machine.tick(&mut mic, &mut store, None, false);
    }
    machine.request_photo_clip(1_000);

    mic.feed(200, 460);
    while !mic.frames.is_empty() {
        machine.tick(&mut mic, &mut store, None, false);
    }
    assert!(!machine.is_recording());

    let pending = store
        .iter_manifests(UploadStatus::Pending)
        .expect("iter pending");
    assert_eq!(pending.len(), 1);
    let manifest = &pending[0].manifest;
    assert_eq!(manifest.captured_at_epoch, 999);
    assert_eq!(manifest.item_type, ItemType::Audio);

    let samples = read_clip_samples(&store, &manifest.filepath);
    assert_eq!(samples.len(), 160_000); // 16000 preroll + 144000 post
}

/// An artifact without a manifest (crash between file write and manifest
/// rename) is invisible to the queue and untouched by retention.
#[test]
fn orphan_artifact_is_ignored_by_queue_and_retention() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = open_store(tmp.path());
    let orphan = store.abs_path("/unsynced/img_99.jpg");
    std::fs::create_dir_all(orphan.parent().expect("parent")).expect("mkdir");
    std::fs::write(&orphan, b"half-written").expect("write orphan");

    assert!(store
        .iter_manifests(UploadStatus::Pending)
        .expect("iter")
        .is_empty());

    struct FullDisk;
    impl StorageUsage for FullDisk {
        fn total_bytes(&self) -> u64 {
            100
        }
        fn used_bytes(&self) -> u64 {
            99
        }
    }
    let report = lifelog_engine::retention::enforce(
        &store,
        &FullDisk,
        &lifelog_core::config::RetentionConfig::default(),
    )
    .expect("sweep");
    assert_eq!(report.deleted, 0);
    assert!(orphan.exists(), "retention only looks at manifests");
}
