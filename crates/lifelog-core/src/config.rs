pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 30_000;

const DEFAULT_SAMPLE_RATE: u32 = 16_000;
const DEFAULT_FRAME_MS: u32 = 20;
const DEFAULT_PREROLL_MS: u32 = 1_000;
const DEFAULT_MIN_CLIP_SECS: u32 = 1;
const DEFAULT_MAX_CLIP_SECS: u32 = 60;
const DEFAULT_VAD_START_FRAMES: u32 = 4;
const DEFAULT_VAD_STOP_FRAMES: u32 = 50;
const DEFAULT_RMS_START_MULT: f32 = 3.0;
const DEFAULT_RMS_STOP_MULT: f32 = 1.8;
const DEFAULT_NOISE_EMA_ALPHA: f32 = 0.01;
const DEFAULT_NOISE_UPDATE_MAX_MULT: f32 = 1.5;
const DEFAULT_PHOTO_CLIP_POST_MS: u32 = 9_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_HEARTBEAT_DURATION_MS: u32 = 3_000;

const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_UPLOAD_BACKOFF_SECS: [u64; 3] = [60, 300, 1_800];
const DEFAULT_UPLOAD_INTERVAL_MS: u64 = 15_000;
const DEFAULT_UPLOAD_BATCH_SIZE: usize = 5;
const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 8 * 1024;

const DEFAULT_MIN_FREE_PCT: u8 = 15;
const DEFAULT_EMERGENCY_FREE_PCT: u8 = 5;
const DEFAULT_RETENTION_INTERVAL_MS: u64 = 60 * 60 * 1_000;
const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 60 * 60 * 1_000;

const DEFAULT_WIFI_RETRY_MS: u64 = 10_000;
const DEFAULT_WIFI_CONNECT_TIMEOUT_MS: u64 = 200;
const DEFAULT_WIFI_BOOT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_NTP_RETRY_MS: u64 = 15_000;
const DEFAULT_NTP_SYNC_TIMEOUT_MS: u64 = 500;
const DEFAULT_NTP_BOOT_TIMEOUT_MS: u64 = 8_000;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub preroll_ms: u32,
    pub min_clip_secs: u32,
    pub max_clip_secs: u32,
    /// Consecutive frames over the start threshold before a clip begins.
    pub vad_start_frames: u32,
    /// Consecutive frames under the stop threshold before a clip ends.
    pub vad_stop_frames: u32,
    pub rms_start_mult: f32,
    pub rms_stop_mult: f32,
    pub noise_ema_alpha: f32,
    /// The noise floor only adapts while the frame RMS stays below
    /// `noise_rms * noise_update_max_mult`, so speech does not drag it up.
    pub noise_update_max_mult: f32,
    pub photo_clip_enabled: bool,
    pub photo_clip_post_ms: u32,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_duration_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
            preroll_ms: DEFAULT_PREROLL_MS,
            min_clip_secs: DEFAULT_MIN_CLIP_SECS,
            max_clip_secs: DEFAULT_MAX_CLIP_SECS,
            vad_start_frames: DEFAULT_VAD_START_FRAMES,
            vad_stop_frames: DEFAULT_VAD_STOP_FRAMES,
            rms_start_mult: DEFAULT_RMS_START_MULT,
            rms_stop_mult: DEFAULT_RMS_STOP_MULT,
            noise_ema_alpha: DEFAULT_NOISE_EMA_ALPHA,
            noise_update_max_mult: DEFAULT_NOISE_UPDATE_MAX_MULT,
            photo_clip_enabled: true,
            photo_clip_post_ms: DEFAULT_PHOTO_CLIP_POST_MS,
            heartbeat_enabled: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_duration_ms: DEFAULT_HEARTBEAT_DURATION_MS,
        }
    }
}

impl AudioConfig {
    pub fn ms_to_samples(&self, ms: u32) -> u64 {
        u64::from(self.sample_rate) * u64::from(ms) / 1_000
    }

    pub fn frame_samples(&self) -> usize {
        self.ms_to_samples(self.frame_ms) as usize
    }

    pub fn preroll_samples(&self) -> u64 {
        self.ms_to_samples(self.preroll_ms)
    }

    pub fn min_samples(&self) -> u64 {
        u64::from(self.min_clip_secs) * u64::from(self.sample_rate)
    }

    pub fn max_samples(&self) -> u64 {
        u64::from(self.max_clip_secs) * u64::from(self.sample_rate)
    }

    pub fn preroll_secs(&self) -> u64 {
        u64::from(self.preroll_ms / 1_000)
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Empty token disables the upload engine entirely.
    pub device_token: String,
    pub max_attempts: u32,
    pub backoff_secs: [u64; 3],
    pub interval_ms: u64,
    pub batch_size: usize,
    pub chunk_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            device_token: String::new(),
            max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_UPLOAD_BACKOFF_SECS,
            interval_ms: DEFAULT_UPLOAD_INTERVAL_MS,
            batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
        }
    }
}

impl UploadConfig {
    /// Seconds a PENDING manifest waits after its n-th failed attempt.
    pub fn backoff_seconds(&self, attempts: u32) -> u64 {
        match attempts {
            0 => 0,
            1 => self.backoff_secs[0],
            2 => self.backoff_secs[1],
            _ => self.backoff_secs[2],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub min_free_pct: u8,
    pub emergency_free_pct: u8,
    pub interval_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_free_pct: DEFAULT_MIN_FREE_PCT,
            emergency_free_pct: DEFAULT_EMERGENCY_FREE_PCT,
            interval_ms: DEFAULT_RETENTION_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub wifi_retry_ms: u64,
    pub wifi_connect_timeout_ms: u64,
    pub wifi_boot_timeout_ms: u64,
    pub ntp_retry_ms: u64,
    pub ntp_sync_timeout_ms: u64,
    pub ntp_boot_timeout_ms: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            wifi_retry_ms: DEFAULT_WIFI_RETRY_MS,
            wifi_connect_timeout_ms: DEFAULT_WIFI_CONNECT_TIMEOUT_MS,
            wifi_boot_timeout_ms: DEFAULT_WIFI_BOOT_TIMEOUT_MS,
            ntp_retry_ms: DEFAULT_NTP_RETRY_MS,
            ntp_sync_timeout_ms: DEFAULT_NTP_SYNC_TIMEOUT_MS,
            ntp_boot_timeout_ms: DEFAULT_NTP_BOOT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub capture: CaptureConfig,
    pub audio: AudioConfig,
    pub upload: UploadConfig,
    pub retention: RetentionConfig,
    pub telemetry: TelemetryConfig,
    pub net: NetConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_defaults_match_contract() {
        let audio = AudioConfig::default();
        assert_eq!(audio.frame_samples(), 320);
        assert_eq!(audio.preroll_samples(), 16_000);
        assert_eq!(audio.min_samples(), 16_000);
        assert_eq!(audio.max_samples(), 960_000);
        assert_eq!(audio.ms_to_samples(9_000), 144_000);
        assert_eq!(audio.preroll_secs(), 1);
    }

    #[test]
    fn backoff_schedule_is_attempt_indexed() {
        let upload = UploadConfig::default();
        assert_eq!(upload.backoff_seconds(0), 0);
        assert_eq!(upload.backoff_seconds(1), 60);
        assert_eq!(upload.backoff_seconds(2), 300);
        assert_eq!(upload.backoff_seconds(3), 1_800);
        assert_eq!(upload.backoff_seconds(7), 1_800);
    }
}
