use crate::platform::Camera;
use crate::store::{ArtifactStore, StoreError};
use chrono::{DateTime, Utc};
use lifelog_core::manifest::{ItemType, Manifest};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PhotoRecord {
    pub seq: u32,
    pub filepath: String,
    pub captured_at_epoch: u64,
}

/// One periodic photo: grab a JPEG, persist the file, then its PENDING
/// manifest. Camera failures are logged and skipped so a flaky sensor
/// cannot stall the loop; storage failures propagate to the caller.
pub fn capture_and_save(
    camera: &mut dyn Camera,
    store: &mut ArtifactStore,
    wall: Option<DateTime<Utc>>,
    capture_paused: bool,
) -> Result<Option<PhotoRecord>, StoreError> {
    if capture_paused {
        return Ok(None);
    }

    let bytes = match camera.capture_jpeg() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(event = "camera_capture_failed", error = %err);
            return Ok(None);
        }
    };

    let seq = store.allocate_seq()?;
    let filepath = store.write_photo(seq, wall, &bytes)?;
    let captured_at_epoch = wall.map(|wall| wall.timestamp() as u64).unwrap_or(0);
    let manifest = Manifest::pending(seq, filepath.clone(), captured_at_epoch, ItemType::Photo);
    store.write_manifest_atomic(&manifest)?;
    info!(event = "photo_saved", seq, filepath = %filepath, bytes = bytes.len());

    Ok(Some(PhotoRecord {
        seq,
        filepath,
        captured_at_epoch,
    }))
}
