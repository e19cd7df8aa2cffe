//! Local filesystem object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::error::ArtifactError;
use super::traits::{validate_key, ArtifactStore};

/// Stores each object as a file under `root`, key segments as directories.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ArtifactError::from_io(key, e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::from_io(key, e))?;
        }

        // Write next to the target and rename so readers never see partial files.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| ArtifactError::from_io(key, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ArtifactError::from_io(key, e));
        }

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(key.to_string())
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ArtifactError::from_io(key, e)),
        }
    }
}
