use crate::audio::AudioMachine;
use crate::capture;
use crate::platform::{Camera, Clock, HttpClient, Microphone, NetLink, StorageUsage};
use crate::retention;
use crate::store::ArtifactStore;
use crate::telemetry;
use crate::upload::UploadEngine;
use chrono::{DateTime, TimeZone, Utc};
use lifelog_core::config::NodeConfig;
use tracing::{info, warn};

/// Per-subsystem readiness plus the capture gate: the one owning context
/// every entry point reads instead of scattered globals. A subsystem that
/// fails to initialize stays disabled for the process lifetime while the
/// rest keep going.
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    pub sd_ok: bool,
    pub camera_ok: bool,
    pub audio_ok: bool,
    pub wifi_ok: bool,
    pub ntp_synced: bool,
    pub capture_paused: bool,
}

/// The board behind trait objects: capture hardware, network, clock and
/// disk metering.
pub struct Platform {
    pub clock: Box<dyn Clock>,
    pub camera: Box<dyn Camera>,
    pub mic: Box<dyn Microphone>,
    pub http: Box<dyn HttpClient>,
    pub net: Box<dyn NetLink>,
    pub usage: Box<dyn StorageUsage>,
}

#[derive(Debug, Default)]
struct Timers {
    last_capture: u64,
    last_upload: u64,
    last_wifi_attempt: u64,
    last_ntp_attempt: u64,
    last_retention: u64,
    last_telemetry: u64,
    last_heartbeat: u64,
}

/// Single cooperative loop. The audio tick leads every cycle because it
/// owns the 20 ms frame deadline; anything that can block for longer
/// (network, retention I/O) only runs while no clip is being recorded.
pub struct Node {
    cfg: NodeConfig,
    ctx: NodeContext,
    store: Option<ArtifactStore>,
    audio: AudioMachine,
    uploader: UploadEngine,
    platform: Platform,
    timers: Timers,
}

impl Node {
    pub fn new(
        cfg: NodeConfig,
        mut ctx: NodeContext,
        store: Option<ArtifactStore>,
        platform: Platform,
    ) -> Self {
        let audio = AudioMachine::new(cfg.audio.clone());
        let uploader = UploadEngine::new(cfg.upload.clone());
        ctx.sd_ok = store.is_some();
        Self {
            cfg,
            ctx,
            store,
            audio,
            uploader,
            platform,
            timers: Timers::default(),
        }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn store(&self) -> Option<&ArtifactStore> {
        self.store.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.audio.is_recording()
    }

    fn wall(&self) -> Option<DateTime<Utc>> {
        if !self.ctx.ntp_synced {
            return None;
        }
        Utc.timestamp_opt(self.platform.clock.wall_epoch() as i64, 0)
            .single()
    }

    /// Epoch seconds for attempt bookkeeping: wall time once synced,
    /// uptime seconds before that so backoff spacing still works.
    fn now_epoch(&self) -> u64 {
        if self.ctx.ntp_synced {
            self.platform.clock.wall_epoch()
        } else {
            self.platform.clock.uptime_ms() / 1_000
        }
    }

    /// Boot: one immediate photo, then best-effort Wi-Fi and NTP with the
    /// longer boot timeouts.
    pub fn boot(&mut self) {
        self.capture_photo();
        if !self.ctx.wifi_ok {
            self.ctx.wifi_ok = self
                .platform
                .net
                .connect_wifi(self.cfg.net.wifi_boot_timeout_ms);
        }
        self.ctx.ntp_synced =
            self.ctx.wifi_ok && self.platform.net.sync_ntp(self.cfg.net.ntp_boot_timeout_ms);
        info!(
            event = "node_booted",
            sd_ok = self.ctx.sd_ok,
            camera_ok = self.ctx.camera_ok,
            audio_ok = self.ctx.audio_ok,
            wifi_ok = self.ctx.wifi_ok,
            ntp_synced = self.ctx.ntp_synced
        );
    }

    /// One cycle at the clock's current uptime.
    pub fn run_cycle(&mut self) {
        let now_ms = self.platform.clock.uptime_ms();
        self.cycle_at(now_ms);
    }

    /// One cycle at an injected uptime, fixed ordering: audio frame first,
    /// then network recovery, periodic photo, heartbeat raise, upload
    /// batch, retention, telemetry.
    pub fn cycle_at(&mut self, now_ms: u64) {
        self.audio_tick();
        let recording = self.audio.is_recording();

        if !self.ctx.wifi_ok
            && !recording
            && now_ms - self.timers.last_wifi_attempt >= self.cfg.net.wifi_retry_ms
        {
            self.ctx.wifi_ok = self
                .platform
                .net
                .connect_wifi(self.cfg.net.wifi_connect_timeout_ms);
            self.timers.last_wifi_attempt = now_ms;
            if self.ctx.wifi_ok {
                info!(event = "wifi_connected");
            }
        }

        if self.ctx.wifi_ok
            && !self.ctx.ntp_synced
            && !recording
            && now_ms - self.timers.last_ntp_attempt >= self.cfg.net.ntp_retry_ms
        {
            self.ctx.ntp_synced = self.platform.net.sync_ntp(self.cfg.net.ntp_sync_timeout_ms);
            self.timers.last_ntp_attempt = now_ms;
            info!(event = "ntp_sync", ok = self.ctx.ntp_synced);
        }

        if now_ms - self.timers.last_capture >= self.cfg.capture.interval_ms {
            self.capture_photo();
            self.timers.last_capture = now_ms;
        }

        if self.ctx.audio_ok
            && self.cfg.audio.heartbeat_enabled
            && !recording
            && !self.audio.heartbeat_pending()
            && now_ms - self.timers.last_heartbeat >= self.cfg.audio.heartbeat_interval_ms
        {
            self.audio.request_heartbeat();
            self.timers.last_heartbeat = now_ms;
        }

        if !recording && now_ms - self.timers.last_upload >= self.cfg.upload.interval_ms {
            self.run_upload_batch();
            self.timers.last_upload = now_ms;
        }

        if !recording && now_ms - self.timers.last_retention >= self.cfg.retention.interval_ms {
            self.enforce_retention();
            self.timers.last_retention = now_ms;
        }

        if !recording && now_ms - self.timers.last_telemetry >= self.cfg.telemetry.interval_ms {
            self.send_telemetry(now_ms);
            self.timers.last_telemetry = now_ms;
        }
    }

    fn audio_tick(&mut self) {
        if !self.ctx.audio_ok {
            return;
        }
        let wall = self.wall();
        let capture_paused = self.ctx.capture_paused;
        let Some(store) = self.store.as_mut() else {
            return;
        };
        self.audio
            .tick(self.platform.mic.as_mut(), store, wall, capture_paused);
    }

    fn capture_photo(&mut self) {
        if !self.ctx.camera_ok {
            return;
        }
        let wall = self.wall();
        let capture_paused = self.ctx.capture_paused;
        let Some(store) = self.store.as_mut() else {
            return;
        };
        match capture::capture_and_save(self.platform.camera.as_mut(), store, wall, capture_paused)
        {
            Ok(Some(record)) => {
                if self.ctx.audio_ok
                    && self.cfg.audio.photo_clip_enabled
                    && !self.audio.is_recording()
                {
                    self.audio.request_photo_clip(record.captured_at_epoch);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(event = "photo_capture_failed", error = %err),
        }
    }

    fn run_upload_batch(&mut self) {
        if !self.ctx.wifi_ok {
            return;
        }
        let now_epoch = self.now_epoch();
        let ntp_synced = self.ctx.ntp_synced;
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let report =
            self.uploader
                .run_batch(store, self.platform.http.as_mut(), now_epoch, ntp_synced);
        if report.attempted > 0 {
            info!(
                event = "upload_batch",
                attempted = report.attempted,
                uploaded = report.uploaded,
                failed = report.failed_terminal
            );
        }
    }

    fn enforce_retention(&mut self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match retention::enforce(store, self.platform.usage.as_ref(), &self.cfg.retention) {
            Ok(report) => self.ctx.capture_paused = report.capture_paused,
            Err(err) => warn!(event = "retention_failed", error = %err),
        }
    }

    fn send_telemetry(&mut self, now_ms: u64) {
        if !self.ctx.wifi_ok {
            return;
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };
        telemetry::send(
            self.platform.http.as_mut(),
            store,
            self.platform.usage.as_ref(),
            self.platform.net.as_ref(),
            &self.cfg.upload.device_token,
            now_ms,
        );
    }
}
