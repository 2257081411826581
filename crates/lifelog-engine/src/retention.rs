use crate::platform::StorageUsage;
use crate::store::{ArtifactStore, StoreError, StoredManifest};
use lifelog_core::config::RetentionConfig;
use lifelog_core::manifest::UploadStatus;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: usize,
    pub free_pct: u8,
    pub capture_paused: bool,
}

pub fn free_percent(usage: &dyn StorageUsage) -> u8 {
    let total = usage.total_bytes();
    if total == 0 {
        return 0;
    }
    let used = usage.used_bytes().min(total);
    ((total - used) * 100 / total) as u8
}

fn find_oldest_uploaded(store: &ArtifactStore) -> Result<Option<StoredManifest>, StoreError> {
    let mut best: Option<StoredManifest> = None;
    for item in store.iter_manifests(UploadStatus::Uploaded)? {
        let better = match &best {
            None => true,
            Some(current) => item.manifest.is_older_than(&current.manifest),
        };
        if better {
            best = Some(item);
        }
    }
    Ok(best)
}

/// One sweep: while free space sits below the floor, delete the oldest
/// UPLOADED pair and re-measure. PENDING and FAILED manifests are never
/// touched. After the sweep, capture stays paused while free space is
/// under the emergency floor.
pub fn enforce(
    store: &ArtifactStore,
    usage: &dyn StorageUsage,
    cfg: &RetentionConfig,
) -> Result<RetentionReport, StoreError> {
    let mut free_pct = free_percent(usage);
    if free_pct >= cfg.min_free_pct {
        return Ok(RetentionReport {
            deleted: 0,
            free_pct,
            capture_paused: false,
        });
    }

    let mut deleted = 0;
    while free_pct < cfg.min_free_pct {
        let Some(item) = find_oldest_uploaded(store)? else {
            break;
        };
        store.delete_pair(&item)?;
        deleted += 1;
        free_pct = free_percent(usage);
    }

    let capture_paused = free_pct < cfg.emergency_free_pct;
    info!(event = "retention_swept", deleted, free_pct);
    if capture_paused {
        warn!(event = "capture_paused_low_space", free_pct);
    }
    Ok(RetentionReport {
        deleted,
        free_pct,
        capture_paused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryStateStore;
    use lifelog_core::manifest::{ItemType, Manifest};
    use std::fs;
    use std::path::Path;

    /// Measures real bytes under the store root on top of a fixed base, so
    /// deletions actually free space during a sweep.
    struct DirUsage {
        root: std::path::PathBuf,
        total: u64,
        base_used: u64,
    }

    fn dir_size(path: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(path) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    dir_size(&path)
                } else {
                    path.metadata().map(|meta| meta.len()).unwrap_or(0)
                }
            })
            .sum()
    }

    impl StorageUsage for DirUsage {
        fn total_bytes(&self) -> u64 {
            self.total
        }

        fn used_bytes(&self) -> u64 {
            self.base_used + dir_size(&self.root)
        }
    }

    fn open_store(dir: &Path) -> ArtifactStore {
        ArtifactStore::open(dir, Box::<MemoryStateStore>::default()).expect("open store")
    }

    fn seed_artifact(
        store: &ArtifactStore,
        seq: u32,
        epoch: u64,
        status: UploadStatus,
        bytes: usize,
    ) -> String {
        let filepath = format!("/unsynced/img_{seq}.jpg");
        let abs = store.abs_path(&filepath);
        fs::create_dir_all(abs.parent().expect("parent")).expect("mkdir");
        fs::write(&abs, vec![0u8; bytes]).expect("write artifact");
        let mut manifest = Manifest::pending(seq, filepath.clone(), epoch, ItemType::Photo);
        manifest.status = status;
        store.write_manifest_atomic(&manifest).expect("manifest");
        filepath
    }

    #[test]
    fn sweep_above_floor_unpauses_and_deletes_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(tmp.path());
        seed_artifact(&store, 1, 100, UploadStatus::Uploaded, 1_000);
        let usage = DirUsage {
            root: tmp.path().to_path_buf(),
            total: 1_000_000,
            base_used: 0,
        };

        let report = enforce(&store, &usage, &RetentionConfig::default()).expect("sweep");
        assert_eq!(report.deleted, 0);
        assert!(!report.capture_paused);
        assert_eq!(
            store
                .iter_manifests(UploadStatus::Uploaded)
                .expect("iter")
                .len(),
            1
        );
    }

    #[test]
    fn sweep_deletes_oldest_uploaded_until_floor_and_spares_pending() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(tmp.path());
        let oldest = seed_artifact(&store, 1, 100, UploadStatus::Uploaded, 8_000);
        let middle = seed_artifact(&store, 2, 200, UploadStatus::Uploaded, 8_000);
        let newest = seed_artifact(&store, 3, 300, UploadStatus::Uploaded, 8_000);
        let pending = seed_artifact(&store, 4, 150, UploadStatus::Pending, 2_000);

        // ~7.5% free initially; each deletion frees ~4%.
        let usage = DirUsage {
            root: tmp.path().to_path_buf(),
            total: 200_000,
            base_used: 158_000,
        };

        let report = enforce(&store, &usage, &RetentionConfig::default()).expect("sweep");
        assert_eq!(report.deleted, 2);
        assert!(report.free_pct >= 15);
        assert!(!report.capture_paused);

        assert!(!store.artifact_exists(&oldest));
        assert!(!store.artifact_exists(&middle));
        assert!(store.artifact_exists(&newest));
        assert!(store.artifact_exists(&pending));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn sweep_stops_when_no_uploaded_remain_and_pauses_below_emergency() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(tmp.path());
        let pending = seed_artifact(&store, 1, 100, UploadStatus::Pending, 4_000);
        let mut failed = Manifest::pending(2, "/unsynced/img_2.jpg", 200, ItemType::Photo);
        failed.status = UploadStatus::Failed;
        store.write_manifest_atomic(&failed).expect("manifest");

        let usage = DirUsage {
            root: tmp.path().to_path_buf(),
            total: 100_000,
            base_used: 97_000,
        };

        let report = enforce(&store, &usage, &RetentionConfig::default()).expect("sweep");
        assert_eq!(report.deleted, 0);
        assert!(report.capture_paused);
        assert!(store.artifact_exists(&pending));
        assert_eq!(
            store
                .iter_manifests(UploadStatus::Failed)
                .expect("iter")
                .len(),
            1
        );
    }

    #[test]
    fn free_percent_handles_degenerate_meters() {
        struct Fixed(u64, u64);
        impl StorageUsage for Fixed {
            fn total_bytes(&self) -> u64 {
                self.0
            }
            fn used_bytes(&self) -> u64 {
                self.1
            }
        }
        assert_eq!(free_percent(&Fixed(0, 0)), 0);
        assert_eq!(free_percent(&Fixed(100, 200)), 0);
        assert_eq!(free_percent(&Fixed(100, 85)), 15);
    }
}
