use crate::platform::Microphone;
use crate::store::{ArtifactStore, StoreError};
use chrono::{DateTime, Utc};
use lifelog_core::config::AudioConfig;
use lifelog_core::manifest::{ItemType, Manifest};
use tracing::{debug, info, warn};

pub fn compute_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: u64 = samples
        .iter()
        .map(|&sample| {
            let value = i64::from(sample) * i64::from(sample);
            value as u64
        })
        .sum();
    ((sum as f64) / (samples.len() as f64)).sqrt() as f32
}

/// Ring of the most recent samples, written ahead of a clip so the
/// recording includes context preceding its trigger.
struct PrerollBuffer {
    samples: Vec<i16>,
    index: usize,
    filled: bool,
}

impl PrerollBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity],
            index: 0,
            filled: false,
        }
    }

    fn push(&mut self, frame: &[i16]) {
        if self.samples.is_empty() {
            return;
        }
        for &sample in frame {
            self.samples[self.index] = sample;
            self.index += 1;
            if self.index >= self.samples.len() {
                self.index = 0;
                self.filled = true;
            }
        }
    }

    /// Oldest-first drain into the clip. An unfilled ring is written from
    /// index 0, not from its true oldest sample; recordings that start
    /// within the first second carry that slight inaccuracy.
    fn write_to(&self, writer: &mut crate::store::AudioClipWriter) -> Result<(), StoreError> {
        if self.samples.is_empty() {
            return Ok(());
        }
        if self.filled {
            writer.write_frame(&self.samples[self.index..])?;
            if self.index > 0 {
                writer.write_frame(&self.samples[..self.index])?;
            }
        } else if self.index > 0 {
            writer.write_frame(&self.samples[..self.index])?;
        }
        Ok(())
    }
}

struct ActiveClip {
    writer: crate::store::AudioClipWriter,
    start_epoch: u64,
    /// Non-zero for forced clips; the recording stops once this many
    /// samples are on disk, VAD is ignored.
    force_stop_samples: u64,
}

/// Two-state VAD recorder owning the microphone. One `tick` performs one
/// blocking frame read; everything else is driven off that frame.
pub struct AudioMachine {
    cfg: AudioConfig,
    frame: Vec<i16>,
    preroll: PrerollBuffer,
    noise_rms: f32,
    over_count: u32,
    under_count: u32,
    active: Option<ActiveClip>,
    photo_clip_pending: Option<u64>,
    heartbeat_pending: bool,
}

impl AudioMachine {
    pub fn new(cfg: AudioConfig) -> Self {
        let frame = vec![0i16; cfg.frame_samples()];
        let preroll = PrerollBuffer::new(cfg.preroll_samples() as usize);
        Self {
            cfg,
            frame,
            preroll,
            noise_rms: 0.0,
            over_count: 0,
            under_count: 0,
            active: None,
            photo_clip_pending: None,
            heartbeat_pending: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn photo_clip_pending(&self) -> bool {
        self.photo_clip_pending.is_some()
    }

    pub fn heartbeat_pending(&self) -> bool {
        self.heartbeat_pending
    }

    /// Ask for a forced clip around a photo. Only honored while idle; the
    /// clip timestamp is the photo's capture epoch (0 when unsynced).
    pub fn request_photo_clip(&mut self, captured_at_epoch: u64) {
        if self.active.is_none() {
            self.photo_clip_pending = Some(captured_at_epoch);
        }
    }

    /// Ask for a scheduled heartbeat clip. A pending photo clip wins.
    pub fn request_heartbeat(&mut self) {
        if self.active.is_none() && self.photo_clip_pending.is_none() {
            self.heartbeat_pending = true;
        }
    }

    pub fn tick(
        &mut self,
        mic: &mut dyn Microphone,
        store: &mut ArtifactStore,
        wall: Option<DateTime<Utc>>,
        capture_paused: bool,
    ) {
        let mut frame = std::mem::take(&mut self.frame);
        let count = match mic.read_frame(&mut frame) {
            Ok(count) => count,
            Err(err) => {
                warn!(event = "mic_read_failed", error = %err);
                self.frame = frame;
                return;
            }
        };
        if count > 0 {
            self.process_frame(&frame[..count], store, wall, capture_paused);
        }
        self.frame = frame;
    }

    fn process_frame(
        &mut self,
        samples: &[i16],
        store: &mut ArtifactStore,
        wall: Option<DateTime<Utc>>,
        capture_paused: bool,
    ) {
        let rms = compute_rms(samples);
        if self.active.is_none() {
            self.idle_frame(samples, rms, store, wall, capture_paused);
        } else {
            self.recording_frame(samples, rms, store);
        }
    }

    fn idle_frame(
        &mut self,
        samples: &[i16],
        rms: f32,
        store: &mut ArtifactStore,
        wall: Option<DateTime<Utc>>,
        capture_paused: bool,
    ) {
        let now_epoch = wall.map(|wall| wall.timestamp() as u64).unwrap_or(0);

        // Forced starts are single-shot: the flag is consumed even when
        // the start itself is refused.
        if let Some(epoch) = self.photo_clip_pending.take() {
            let stop =
                self.cfg.preroll_samples() + self.cfg.ms_to_samples(self.cfg.photo_clip_post_ms);
            self.start_recording(store, samples, epoch, stop, wall, capture_paused);
            return;
        }
        if self.heartbeat_pending {
            self.heartbeat_pending = false;
            let stop =
                self.cfg.preroll_samples() + self.cfg.ms_to_samples(self.cfg.heartbeat_duration_ms);
            self.start_recording(store, samples, now_epoch, stop, wall, capture_paused);
            return;
        }

        self.preroll.push(samples);

        if self.noise_rms <= 1.0 {
            self.noise_rms = rms;
        } else if rms < self.noise_rms * self.cfg.noise_update_max_mult {
            self.noise_rms =
                self.noise_rms * (1.0 - self.cfg.noise_ema_alpha) + rms * self.cfg.noise_ema_alpha;
        }

        if rms > self.noise_rms * self.cfg.rms_start_mult {
            self.over_count += 1;
        } else {
            self.over_count = 0;
        }

        if self.over_count >= self.cfg.vad_start_frames
            && self.start_recording(store, samples, now_epoch, 0, wall, capture_paused)
        {
            self.over_count = 0;
        }
    }

    fn start_recording(
        &mut self,
        store: &mut ArtifactStore,
        first_frame: &[i16],
        epoch: u64,
        force_stop_samples: u64,
        wall: Option<DateTime<Utc>>,
        capture_paused: bool,
    ) -> bool {
        if capture_paused {
            return false;
        }

        let seq = match store.allocate_seq() {
            Ok(seq) => seq,
            Err(err) => {
                warn!(event = "audio_seq_failed", error = %err);
                return false;
            }
        };

        // Timestamp the preroll head, not the trigger.
        let preroll_secs = self.cfg.preroll_secs();
        let start_epoch = if epoch > preroll_secs {
            epoch - preroll_secs
        } else {
            epoch
        };

        let mut writer = match store.begin_audio_clip(seq, wall, self.cfg.sample_rate) {
            Ok(writer) => writer,
            Err(err) => {
                warn!(event = "audio_open_failed", seq, error = %err);
                return false;
            }
        };

        if let Err(err) = self
            .preroll
            .write_to(&mut writer)
            .and_then(|()| writer.write_frame(first_frame))
        {
            warn!(event = "audio_start_write_failed", seq, error = %err);
            let _ = writer.finalize(false);
            return false;
        }

        info!(event = "audio_clip_started", seq, forced = force_stop_samples > 0);
        self.under_count = 0;
        self.active = Some(ActiveClip {
            writer,
            start_epoch,
            force_stop_samples,
        });
        true
    }

    fn recording_frame(&mut self, samples: &[i16], rms: f32, store: &mut ArtifactStore) {
        let (write_result, samples_written, force_stop_samples) = {
            let Some(active) = self.active.as_mut() else {
                return;
            };
            let result = active.writer.write_frame(samples);
            (
                result,
                active.writer.samples_written(),
                active.force_stop_samples,
            )
        };

        if let Err(err) = write_result {
            warn!(event = "audio_write_failed", error = %err);
            self.finish(store, false);
            return;
        }

        if force_stop_samples > 0 {
            if samples_written >= force_stop_samples {
                self.finish(store, true);
            }
            return;
        }

        if rms < self.noise_rms * self.cfg.rms_stop_mult {
            self.under_count += 1;
        } else {
            self.under_count = 0;
        }

        if self.under_count >= self.cfg.vad_stop_frames
            || samples_written >= self.cfg.max_samples()
        {
            self.finish(store, true);
        }
    }

    fn finish(&mut self, store: &ArtifactStore, keep: bool) {
        let Some(active) = self.active.take() else {
            return;
        };

        let samples_written = active.writer.samples_written();
        let keep = keep && samples_written >= self.cfg.min_samples();

        match active.writer.finalize(keep) {
            Ok(Some(clip)) => {
                let manifest = Manifest::pending(
                    clip.seq,
                    clip.filepath.clone(),
                    active.start_epoch,
                    ItemType::Audio,
                );
                match store.write_manifest_atomic(&manifest) {
                    Ok(()) => info!(
                        event = "audio_clip_saved",
                        seq = clip.seq,
                        filepath = %clip.filepath,
                        samples = clip.samples_written
                    ),
                    Err(err) => {
                        warn!(event = "audio_manifest_failed", seq = clip.seq, error = %err);
                    }
                }
            }
            Ok(None) => debug!(event = "audio_clip_dropped", samples = samples_written),
            Err(err) => warn!(event = "audio_finalize_failed", error = %err),
        }

        self.over_count = 0;
        self.under_count = 0;
    }
}
