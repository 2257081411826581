use crate::platform::{HttpClient, NetLink, StorageUsage};
use crate::store::ArtifactStore;
use serde_json::json;
use tracing::{debug, warn};

const TELEMETRY_PATH: &str = "/devices/telemetry";

/// Best-effort device heartbeat for the fleet dashboard. Failures only
/// log; nothing downstream depends on the result.
pub fn send(
    http: &mut dyn HttpClient,
    store: &ArtifactStore,
    usage: &dyn StorageUsage,
    net: &dyn NetLink,
    token: &str,
    uptime_ms: u64,
) {
    if token.is_empty() {
        return;
    }

    let total = usage.total_bytes();
    let used = usage.used_bytes();
    let free = total.saturating_sub(used);
    let body = json!({
        "uptime_seconds": uptime_ms / 1_000,
        "sd_used_mb": used / (1024 * 1024),
        "sd_free_mb": free / (1024 * 1024),
        "backlog_count": store.pending_count(),
        "wifi_rssi": net.rssi(),
        "firmware_version": lifelog_core::config::FIRMWARE_VERSION,
    });

    match http.post_json(TELEMETRY_PATH, token, &body) {
        Ok(response) if response.status == 200 => debug!(event = "telemetry_sent"),
        Ok(response) => warn!(event = "telemetry_rejected", status = response.status),
        Err(err) => warn!(event = "telemetry_failed", error = %err),
    }
}
