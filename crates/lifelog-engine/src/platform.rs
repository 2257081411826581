use serde_json::Value;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Monotonic uptime plus a best-effort wall clock. Whether the wall clock
/// is trustworthy is tracked separately by the scheduler's `ntp_synced`
/// flag; implementations just report what they have.
pub trait Clock {
    fn uptime_ms(&self) -> u64;
    fn wall_epoch(&self) -> u64;
}

pub trait Camera {
    /// One JPEG frame. The returned buffer is owned by the caller.
    fn capture_jpeg(&mut self) -> io::Result<Vec<u8>>;
}

pub trait Microphone {
    /// Blocking read of up to one frame of 16-bit mono samples. Returns the
    /// number of samples written into `frame`.
    fn read_frame(&mut self, frame: &mut [i16]) -> io::Result<usize>;
}

/// Wi-Fi association and NTP sync, each with a bounded timeout. Both are
/// best-effort: `false` means "not ready yet", never a fatal state.
pub trait NetLink {
    fn connect_wifi(&mut self, timeout_ms: u64) -> bool;
    fn sync_ntp(&mut self, timeout_ms: u64) -> bool;
    fn rssi(&self) -> i32;
}

pub trait StorageUsage {
    fn total_bytes(&self) -> u64;
    fn used_bytes(&self) -> u64;
}

/// Namespaced persistent key-value store for process-wide counters.
/// Writes must be durable before returning.
pub trait StateStore {
    fn get_u32(&self, key: &str) -> io::Result<Option<u32>>;
    fn put_u32(&mut self, key: &str, value: u32) -> io::Result<()>;
}

/// Volatile state store for tests and bench runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: std::collections::HashMap<String, u32>,
}

impl StateStore for MemoryStateStore {
    fn get_u32(&self, key: &str) -> io::Result<Option<u32>> {
        Ok(self.values.get(key).copied())
    }

    fn put_u32(&mut self, key: &str, value: u32) -> io::Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The node's HTTP surface: JSON POSTs against the ingest API and a
/// low-level streaming PUT against a signed upload target. Implementations
/// carry the API base URL and hard per-call timeouts.
pub trait HttpClient {
    fn post_json(&mut self, path: &str, token: &str, body: &Value)
        -> Result<HttpResponse, HttpError>;

    /// `PUT <path>` on `host:port` streaming `file` with the given
    /// content type, accurate `Content-Length` and `Connection: close`.
    /// Returns the response status code.
    fn put_file(
        &mut self,
        host: &str,
        port: u16,
        path: &str,
        content_type: &str,
        file: &Path,
    ) -> Result<u16, HttpError>;
}
