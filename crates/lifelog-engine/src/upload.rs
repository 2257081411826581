use crate::platform::HttpClient;
use crate::store::{ArtifactStore, StoredManifest};
use chrono::{TimeZone, Utc};
use lifelog_core::config::UploadConfig;
use lifelog_core::manifest::{Manifest, UploadStatus};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

const UPLOAD_URL_PATH: &str = "/devices/upload-url";
const INGEST_PATH: &str = "/devices/ingest";

fn default_upload_port() -> u16 {
    443
}

#[derive(Debug, Deserialize)]
struct UploadTarget {
    upload_host: String,
    #[serde(default = "default_upload_port")]
    upload_port: u16,
    upload_path: String,
    object_key: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed_terminal: usize,
}

/// Drains the PENDING backlog oldest-first. All retry state lives in the
/// manifests themselves so a reboot never resets backoff.
pub struct UploadEngine {
    cfg: UploadConfig,
}

impl UploadEngine {
    pub fn new(cfg: UploadConfig) -> Self {
        Self { cfg }
    }

    /// One batch tick: up to `batch_size` items, stopping early on the
    /// first failure (including "nothing eligible"). Without a device
    /// token the engine is a no-op.
    pub fn run_batch(
        &self,
        store: &mut ArtifactStore,
        http: &mut dyn HttpClient,
        now_epoch: u64,
        ntp_synced: bool,
    ) -> UploadReport {
        let mut report = UploadReport::default();
        if self.cfg.device_token.is_empty() {
            debug!(event = "upload_disabled_no_token");
            return report;
        }
        for _ in 0..self.cfg.batch_size {
            if !self.upload_one(store, http, now_epoch, ntp_synced, &mut report) {
                break;
            }
        }
        report
    }

    /// Oldest eligible PENDING manifest. Items already past the attempt
    /// cap are settled to FAILED on sight and skipped; items inside their
    /// backoff window are left alone.
    fn find_oldest_pending(
        &self,
        store: &ArtifactStore,
        now_epoch: u64,
    ) -> Option<StoredManifest> {
        let items = match store.iter_manifests(UploadStatus::Pending) {
            Ok(items) => items,
            Err(err) => {
                warn!(event = "backlog_scan_failed", error = %err);
                return None;
            }
        };

        let mut best: Option<StoredManifest> = None;
        for item in items {
            if item.manifest.upload_attempts >= self.cfg.max_attempts {
                let mut failed = item.manifest.clone();
                failed.status = UploadStatus::Failed;
                if let Err(err) = store.write_manifest_atomic(&failed) {
                    warn!(event = "failed_settle_error", seq = failed.seq, error = %err);
                }
                continue;
            }

            let backoff = self.cfg.backoff_seconds(item.manifest.upload_attempts);
            if backoff > 0
                && (now_epoch as i64 - item.manifest.last_attempt_epoch as i64) < backoff as i64
            {
                continue;
            }

            let better = match &best {
                None => true,
                Some(current) => item.manifest.is_older_than(&current.manifest),
            };
            if better {
                best = Some(item);
            }
        }
        best
    }

    fn upload_one(
        &self,
        store: &mut ArtifactStore,
        http: &mut dyn HttpClient,
        now_epoch: u64,
        ntp_synced: bool,
        report: &mut UploadReport,
    ) -> bool {
        let Some(item) = self.find_oldest_pending(store, now_epoch) else {
            return false;
        };

        let mut manifest = item.manifest;
        manifest.upload_attempts += 1;
        manifest.last_attempt_epoch = now_epoch;
        // Persisted before any network call so a crash mid-attempt still
        // reflects the spent attempt.
        if let Err(err) = store.write_manifest_atomic(&manifest) {
            warn!(event = "attempt_persist_failed", seq = manifest.seq, error = %err);
            return false;
        }
        report.attempted += 1;

        if !store.artifact_exists(&manifest.filepath) {
            warn!(event = "artifact_missing", seq = manifest.seq, filepath = %manifest.filepath);
            self.settle_failure(store, &mut manifest, report);
            return false;
        }

        let Some(target) = self.request_upload_target(http, &manifest) else {
            self.settle_failure(store, &mut manifest, report);
            return false;
        };

        let abs = store.abs_path(&manifest.filepath);
        match http.put_file(
            &target.upload_host,
            target.upload_port,
            &target.upload_path,
            &manifest.content_type,
            &abs,
        ) {
            Ok(code) if (200..300).contains(&code) => {}
            Ok(code) => {
                warn!(event = "stream_upload_rejected", seq = manifest.seq, status = code);
                self.settle_failure(store, &mut manifest, report);
                return false;
            }
            Err(err) => {
                warn!(event = "stream_upload_failed", seq = manifest.seq, error = %err);
                self.settle_failure(store, &mut manifest, report);
                return false;
            }
        }

        if !self.notify_ingest(http, &manifest, &target.object_key, ntp_synced) {
            self.settle_failure(store, &mut manifest, report);
            return false;
        }

        manifest.status = UploadStatus::Uploaded;
        if let Err(err) = store.write_manifest_atomic(&manifest) {
            warn!(event = "uploaded_persist_failed", seq = manifest.seq, error = %err);
            return false;
        }
        info!(
            event = "uploaded",
            seq = manifest.seq,
            attempts = manifest.upload_attempts
        );
        report.uploaded += 1;
        true
    }

    /// The attempt bump is already durable; a sub-cap failure needs no
    /// further write and waits out its backoff as PENDING. At the cap the
    /// manifest turns terminally FAILED.
    fn settle_failure(
        &self,
        store: &ArtifactStore,
        manifest: &mut Manifest,
        report: &mut UploadReport,
    ) {
        if manifest.upload_attempts < self.cfg.max_attempts {
            return;
        }
        manifest.status = UploadStatus::Failed;
        match store.write_manifest_atomic(manifest) {
            Ok(()) => {
                warn!(
                    event = "upload_exhausted",
                    seq = manifest.seq,
                    attempts = manifest.upload_attempts
                );
                report.failed_terminal += 1;
            }
            Err(err) => warn!(event = "failed_settle_error", seq = manifest.seq, error = %err),
        }
    }

    fn request_upload_target(
        &self,
        http: &mut dyn HttpClient,
        manifest: &Manifest,
    ) -> Option<UploadTarget> {
        let body = json!({
            "filename": manifest.original_filename(),
            "content_type": manifest.content_type,
            "seq": manifest.seq,
        });
        let response = match http.post_json(UPLOAD_URL_PATH, &self.cfg.device_token, &body) {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "upload_url_failed", seq = manifest.seq, error = %err);
                return None;
            }
        };
        if response.status != 200 {
            warn!(event = "upload_url_rejected", seq = manifest.seq, status = response.status);
            return None;
        }
        let target: UploadTarget = match serde_json::from_str(&response.body) {
            Ok(target) => target,
            Err(err) => {
                warn!(event = "upload_url_undecodable", seq = manifest.seq, error = %err);
                return None;
            }
        };
        if target.upload_host.is_empty() || target.upload_path.is_empty() || target.object_key.is_empty()
        {
            warn!(event = "upload_url_incomplete", seq = manifest.seq);
            return None;
        }
        Some(target)
    }

    fn notify_ingest(
        &self,
        http: &mut dyn HttpClient,
        manifest: &Manifest,
        object_key: &str,
        ntp_synced: bool,
    ) -> bool {
        let mut body = json!({
            "object_key": object_key,
            "seq": manifest.seq,
            "content_type": manifest.content_type,
            "item_type": manifest.item_type.as_str(),
            "original_filename": manifest.original_filename(),
            "ntp_synced": ntp_synced,
        });
        if ntp_synced && manifest.captured_at_epoch > 0 {
            if let Some(wall) = Utc
                .timestamp_opt(manifest.captured_at_epoch as i64, 0)
                .single()
            {
                body["captured_at"] = json!(wall.format("%Y-%m-%dT%H:%M:%SZ").to_string());
            }
        }
        match http.post_json(INGEST_PATH, &self.cfg.device_token, &body) {
            // 200 is success even when the server reports a duplicate.
            Ok(response) if response.status == 200 => true,
            Ok(response) => {
                warn!(event = "ingest_rejected", seq = manifest.seq, status = response.status);
                false
            }
            Err(err) => {
                warn!(event = "ingest_failed", seq = manifest.seq, error = %err);
                false
            }
        }
    }
}
