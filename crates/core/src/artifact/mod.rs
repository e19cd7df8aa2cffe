//! Object store access for input and output documents.

mod config;
mod error;
mod fs_store;
mod gateway;
mod http_store;
mod traits;

pub use config::{FsStorageConfig, HttpStorageConfig, StorageBackend, StorageConfig};
pub use error::ArtifactError;
pub use fs_store::FsArtifactStore;
pub use gateway::ArtifactGateway;
pub use http_store::HttpArtifactStore;
pub use traits::{validate_key, ArtifactStore, MAX_KEY_LEN};
