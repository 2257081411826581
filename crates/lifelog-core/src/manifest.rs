use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PHOTO_CONTENT_TYPE: &str = "image/jpeg";
pub const AUDIO_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Uploaded => "UPLOADED",
            UploadStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Uploaded | UploadStatus::Failed)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "PENDING" => Ok(UploadStatus::Pending),
            "UPLOADED" => Ok(UploadStatus::Uploaded),
            "FAILED" => Ok(UploadStatus::Failed),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Photo,
    Audio,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Photo => "photo",
            ItemType::Audio => "audio",
        }
    }

    /// Fallback for manifests written before the field existed.
    pub fn infer_from_path(filepath: &str) -> Self {
        if filepath.ends_with(".wav") {
            ItemType::Audio
        } else {
            ItemType::Photo
        }
    }

    pub fn default_content_type(&self) -> &'static str {
        match self {
            ItemType::Photo => PHOTO_CONTENT_TYPE,
            ItemType::Audio => AUDIO_CONTENT_TYPE,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One JSON sidecar per artifact. Field names are part of the on-disk
/// format and must not change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub filepath: String,
    pub seq: u32,
    pub captured_at_epoch: u64,
    pub status: UploadStatus,
    pub item_type: ItemType,
    pub content_type: String,
    pub upload_attempts: u32,
    pub last_attempt_epoch: u64,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    filepath: String,
    seq: u32,
    #[serde(default)]
    captured_at_epoch: u64,
    status: UploadStatus,
    #[serde(default)]
    item_type: Option<ItemType>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    upload_attempts: u32,
    #[serde(default)]
    last_attempt_epoch: u64,
}

impl Manifest {
    pub fn pending(
        seq: u32,
        filepath: impl Into<String>,
        captured_at_epoch: u64,
        item_type: ItemType,
    ) -> Self {
        Self {
            filepath: filepath.into(),
            seq,
            captured_at_epoch,
            status: UploadStatus::Pending,
            item_type,
            content_type: item_type.default_content_type().to_string(),
            upload_attempts: 0,
            last_attempt_epoch: 0,
        }
    }

    /// Parse a manifest document, filling `item_type` and `content_type`
    /// from the filepath when an older writer omitted them.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        let raw: RawManifest = serde_json::from_str(payload)?;
        let item_type = raw
            .item_type
            .unwrap_or_else(|| ItemType::infer_from_path(&raw.filepath));
        let content_type = match raw.content_type {
            Some(value) if !value.is_empty() => value,
            _ => item_type.default_content_type().to_string(),
        };
        Ok(Self {
            filepath: raw.filepath,
            seq: raw.seq,
            captured_at_epoch: raw.captured_at_epoch,
            status: raw.status,
            item_type,
            content_type,
            upload_attempts: raw.upload_attempts,
            last_attempt_epoch: raw.last_attempt_epoch,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Basename of the artifact file, as reported to the ingest service.
    pub fn original_filename(&self) -> &str {
        self.filepath
            .rsplit('/')
            .next()
            .unwrap_or(self.filepath.as_str())
    }

    /// Ordering shared by upload selection and retention: a timestamped
    /// item beats an unsynced one; two timestamped items compare epochs;
    /// two unsynced items compare sequence numbers.
    pub fn is_older_than(&self, other: &Manifest) -> bool {
        match (self.captured_at_epoch > 0, other.captured_at_epoch > 0) {
            (true, true) => self.captured_at_epoch < other.captured_at_epoch,
            (true, false) => true,
            (false, true) => false,
            (false, false) => self.seq < other.seq,
        }
    }
}
