pub mod audio;
pub mod capture;
pub mod platform;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod upload;

pub use audio::AudioMachine;
pub use platform::{
    Camera, Clock, HttpClient, HttpError, HttpResponse, MemoryStateStore, Microphone, NetLink,
    StateStore, StorageUsage,
};
pub use retention::RetentionReport;
pub use scheduler::{Node, NodeContext, Platform};
pub use store::{ArtifactStore, StoreError, StoredManifest};
pub use upload::{UploadEngine, UploadReport};
