use lifelog_engine::platform::{
    Camera, Clock, HttpClient, HttpError, HttpResponse, Microphone, NetLink, StateStore,
    StorageUsage,
};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn wall_epoch(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// One file per key under a state directory, replaced via tmp + rename so
/// a torn write can never corrupt the persisted counter.
pub struct FsStateStore {
    dir: PathBuf,
}

impl FsStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl StateStore for FsStateStore {
    fn get_u32(&self, key: &str) -> io::Result<Option<u32>> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(text) => text
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn put_u32(&mut self, key: &str, value: u32) -> io::Result<()> {
        let tmp_path = self.dir.join(format!("{key}.tmp"));
        let mut file = File::create(&tmp_path)?;
        file.write_all(value.to_string().as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, self.key_path(key))
    }
}

pub struct DiskUsage {
    path: PathBuf,
}

impl DiskUsage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageUsage for DiskUsage {
    fn total_bytes(&self) -> u64 {
        fs2::total_space(&self.path).unwrap_or(0)
    }

    fn used_bytes(&self) -> u64 {
        let total = fs2::total_space(&self.path).unwrap_or(0);
        let available = fs2::available_space(&self.path).unwrap_or(0);
        total.saturating_sub(available)
    }
}

/// Blocking HTTP built on reqwest: JSON POSTs against the API base, raw
/// streamed PUTs against whatever host the signed target names. Dev
/// deployments may accept untrusted certificates.
pub struct ReqwestHttp {
    client: reqwest::blocking::Client,
    base_url: String,
    chunk_bytes: usize,
}

impl ReqwestHttp {
    pub fn new(
        base_url: impl Into<String>,
        allow_insecure_tls: bool,
        chunk_bytes: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(allow_insecure_tls)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            chunk_bytes,
        })
    }
}

impl HttpClient for ReqwestHttp {
    fn post_json(
        &mut self,
        path: &str,
        token: &str,
        body: &Value,
    ) -> Result<HttpResponse, HttpError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-Device-Token", token)
            .json(body)
            .send()
            .map_err(|err| HttpError::Request(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| HttpError::Request(err.to_string()))?;
        Ok(HttpResponse { status, body })
    }

    fn put_file(
        &mut self,
        host: &str,
        port: u16,
        path: &str,
        content_type: &str,
        file: &Path,
    ) -> Result<u16, HttpError> {
        let file = File::open(file)?;
        let len = file.metadata()?.len();
        let scheme = if port == 443 { "https" } else { "http" };
        let url = format!("{scheme}://{host}:{port}{path}");
        let reader = BufReader::with_capacity(self.chunk_bytes, file);
        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .header(reqwest::header::CONNECTION, "close")
            .body(reqwest::blocking::Body::sized(reader, len))
            .send()
            .map_err(|err| HttpError::Request(err.to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// Bench camera: emits a small JPEG-framed payload that varies per frame.
#[derive(Default)]
pub struct SimCamera {
    frame_count: u32,
}

const JPEG_HEAD: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00,
];

impl Camera for SimCamera {
    fn capture_jpeg(&mut self) -> io::Result<Vec<u8>> {
        self.frame_count += 1;
        let mut bytes = JPEG_HEAD.to_vec();
        bytes.extend_from_slice(&self.frame_count.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        Ok(bytes)
    }
}

/// Bench microphone: low-level pseudo-noise, paced at the real frame
/// cadence so the loop timing matches a blocking I2S driver.
pub struct SimMicrophone {
    frame_ms: u32,
    amplitude: i32,
    state: u32,
}

impl SimMicrophone {
    pub fn new(frame_ms: u32, amplitude: i32) -> Self {
        Self {
            frame_ms,
            amplitude,
            state: 0x2545_f491,
        }
    }
}

impl Microphone for SimMicrophone {
    fn read_frame(&mut self, frame: &mut [i16]) -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(u64::from(self.frame_ms)));
        for sample in frame.iter_mut() {
            self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (self.state >> 20) as i32 - 2_048;
            *sample = (noise * self.amplitude / 2_048) as i16;
        }
        Ok(frame.len())
    }
}

/// On a workstation the OS owns connectivity and the clock; report both as
/// ready so the pipeline exercises its synced paths.
pub struct HostNet;

impl NetLink for HostNet {
    fn connect_wifi(&mut self, _timeout_ms: u64) -> bool {
        true
    }

    fn sync_ntp(&mut self, _timeout_ms: u64) -> bool {
        true
    }

    fn rssi(&self) -> i32 {
        0
    }
}
