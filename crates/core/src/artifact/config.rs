//! Object store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which object store holds input and output documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Fs,
    Http,
}

/// Object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub fs: FsStorageConfig,

    /// Required when `backend = "http"`.
    #[serde(default)]
    pub http: Option<HttpStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            fs: FsStorageConfig::default(),
            http: None,
        }
    }
}

/// Local directory used as an object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsStorageConfig {
    #[serde(default = "default_fs_root")]
    pub root: PathBuf,
}

impl Default for FsStorageConfig {
    fn default() -> Self {
        Self {
            root: default_fs_root(),
        }
    }
}

fn default_fs_root() -> PathBuf {
    PathBuf::from("artifacts")
}

/// S3-style HTTP object store addressed as `{base_url}/{bucket}/{key}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStorageConfig {
    pub base_url: String,
    pub bucket: String,
    /// Bearer token for reads and writes.
    #[serde(default)]
    pub token: Option<String>,
    /// Public base URL returned for uploaded objects. Keys are returned when unset.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    60
}
