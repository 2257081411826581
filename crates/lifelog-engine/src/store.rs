use crate::platform::StateStore;
use chrono::{DateTime, Utc};
use lifelog_core::manifest::{Manifest, UploadStatus};
use lifelog_core::wav;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const SEQ_KEY: &str = "seq";

const MANIFEST_DIR: &str = "manifests";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("manifest decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A manifest together with the sidecar file it was loaded from.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    pub path: PathBuf,
    pub manifest: Manifest,
}

/// Flash layout rooted at one directory:
///
/// ```text
/// manifests/<seq>.json
/// YYYYMMDD/HHMMSS_<seq6>.jpg          (unsynced/img_<seq>.jpg)
/// audio/YYYYMMDD/HHMMSS_<seq6>.wav    (unsynced_audio/audio_<seq>.wav)
/// ```
///
/// Manifest `filepath` fields are stored with a leading slash, relative to
/// this root.
pub struct ArtifactStore {
    root: PathBuf,
    state: Box<dyn StateStore>,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>, state: Box<dyn StateStore>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(MANIFEST_DIR))?;
        Ok(Self { root, state })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next sequence number, persisted before it is handed out. A crash
    /// after the write skips a value; gaps are fine, duplicates are not.
    pub fn allocate_seq(&mut self) -> Result<u32, StoreError> {
        let seq = self.state.get_u32(SEQ_KEY)?.unwrap_or(0);
        self.state.put_u32(SEQ_KEY, seq + 1)?;
        Ok(seq)
    }

    pub fn abs_path(&self, filepath: &str) -> PathBuf {
        self.root.join(filepath.trim_start_matches('/'))
    }

    pub fn artifact_exists(&self, filepath: &str) -> bool {
        self.abs_path(filepath).exists()
    }

    pub fn manifest_path(&self, seq: u32) -> PathBuf {
        self.root.join(MANIFEST_DIR).join(format!("{seq}.json"))
    }

    fn photo_filepath(seq: u32, wall: Option<DateTime<Utc>>) -> String {
        match wall {
            Some(wall) => format!(
                "/{}/{}_{seq:06}.jpg",
                wall.format("%Y%m%d"),
                wall.format("%H%M%S")
            ),
            None => format!("/unsynced/img_{seq}.jpg"),
        }
    }

    fn audio_filepath(seq: u32, wall: Option<DateTime<Utc>>) -> String {
        match wall {
            Some(wall) => format!(
                "/audio/{}/{}_{seq:06}.wav",
                wall.format("%Y%m%d"),
                wall.format("%H%M%S")
            ),
            None => format!("/unsynced_audio/audio_{seq}.wav"),
        }
    }

    /// Write one JPEG under the daily folder (or `unsynced/` without a
    /// valid wall clock) and return its manifest filepath.
    pub fn write_photo(
        &self,
        seq: u32,
        wall: Option<DateTime<Utc>>,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        let filepath = Self::photo_filepath(seq, wall);
        let abs = self.abs_path(&filepath);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&abs)?;
        if let Err(err) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&abs);
            return Err(err.into());
        }
        Ok(filepath)
    }

    /// Open an audio clip file with a placeholder WAV header. Frames are
    /// appended through the returned writer; `finalize` settles the header.
    pub fn begin_audio_clip(
        &self,
        seq: u32,
        wall: Option<DateTime<Utc>>,
        sample_rate: u32,
    ) -> Result<AudioClipWriter, StoreError> {
        let filepath = Self::audio_filepath(seq, wall);
        let abs = self.abs_path(&filepath);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&abs)?;
        if let Err(err) = file.write_all(&wav::encode_header(sample_rate, 0)) {
            drop(file);
            let _ = fs::remove_file(&abs);
            return Err(err.into());
        }
        Ok(AudioClipWriter {
            file,
            abs_path: abs,
            filepath,
            seq,
            sample_rate,
            samples_written: 0,
        })
    }

    /// Single-writer replace: serialize to `<seq>.json.tmp`, fsync, then
    /// rename over the final name so observers only ever see a complete
    /// document.
    pub fn write_manifest_atomic(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let dir = self.root.join(MANIFEST_DIR);
        fs::create_dir_all(&dir)?;
        let final_path = self.manifest_path(manifest.seq);
        let tmp_path = dir.join(format!("{}.json.tmp", manifest.seq));

        let payload = manifest.to_json()?;
        let mut file = File::create(&tmp_path)?;
        if let Err(err) = file
            .write_all(payload.as_bytes())
            .and_then(|()| file.sync_all())
        {
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }

    pub fn load_manifest(&self, path: &Path) -> Result<Manifest, StoreError> {
        let payload = fs::read_to_string(path)?;
        Ok(Manifest::from_json(&payload)?)
    }

    /// All parseable `manifests/*.json` entries with the requested status.
    /// Directories, non-JSON names and undecodable documents are skipped.
    pub fn iter_manifests(&self, status: UploadStatus) -> Result<Vec<StoredManifest>, StoreError> {
        let dir = self.root.join(MANIFEST_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut items = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.load_manifest(&path) {
                Ok(manifest) if manifest.status == status => {
                    items.push(StoredManifest { path, manifest });
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(event = "manifest_unreadable", path = %path.display(), error = %err);
                }
            }
        }
        Ok(items)
    }

    pub fn pending_count(&self) -> usize {
        self.iter_manifests(UploadStatus::Pending)
            .map(|items| items.len())
            .unwrap_or(0)
    }

    /// Retention delete: artifact first, manifest second, so a crash in
    /// between leaves an orphaned manifest the next sweep ignores.
    pub fn delete_pair(&self, item: &StoredManifest) -> Result<(), StoreError> {
        let abs = self.abs_path(&item.manifest.filepath);
        if abs.exists() {
            fs::remove_file(&abs)?;
        }
        if item.path.exists() {
            fs::remove_file(&item.path)?;
        }
        Ok(())
    }
}

pub struct AudioClipWriter {
    file: File,
    abs_path: PathBuf,
    filepath: String,
    seq: u32,
    sample_rate: u32,
    samples_written: u64,
}

#[derive(Debug, Clone)]
pub struct FinalizedClip {
    pub seq: u32,
    pub filepath: String,
    pub samples_written: u64,
}

impl AudioClipWriter {
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn write_frame(&mut self, samples: &[i16]) -> Result<(), StoreError> {
        self.file.write_all(&wav::encode_samples(samples))?;
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn rewrite_header(&mut self, data_bytes: u32) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&wav::encode_header(self.sample_rate, data_bytes))?;
        self.file.sync_all()
    }

    /// Settle the clip: with `keep` the header is rewritten with the true
    /// data length; without it the file is removed. Header rewrite errors
    /// also remove the file so no truncated clip survives.
    pub fn finalize(mut self, keep: bool) -> Result<Option<FinalizedClip>, StoreError> {
        if !keep {
            drop(self.file);
            let _ = fs::remove_file(&self.abs_path);
            return Ok(None);
        }

        let data_bytes = u32::try_from(self.samples_written * 2).unwrap_or(u32::MAX);
        if let Err(err) = self.rewrite_header(data_bytes) {
            drop(self.file);
            let _ = fs::remove_file(&self.abs_path);
            return Err(err.into());
        }
        Ok(Some(FinalizedClip {
            seq: self.seq,
            filepath: self.filepath,
            samples_written: self.samples_written,
        }))
    }
}
