//! Trait definitions for the engine module.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::EngineError;
use crate::job::{JobConfig, JobProgress};

/// An opaque document translation engine.
///
/// A call may run for many minutes. Callers bound it with an external
/// timeout by dropping the future, and dropping it must stop all engine
/// work: an implementation that runs a child process kills it.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Returns the name of this engine implementation.
    fn name(&self) -> &str;

    /// Translate `input`, writing rendered documents into `output_dir`.
    /// Returns the produced files in the order they should be published.
    async fn translate(
        &self,
        input: &Path,
        config: &JobConfig,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let (progress_tx, _) = mpsc::channel(1);
        self.translate_with_progress(input, config, output_dir, progress_tx)
            .await
    }

    /// Translates with progress reporting.
    ///
    /// Updates are best effort: if the channel is full or the receiver is
    /// dropped, translation continues without them.
    async fn translate_with_progress(
        &self,
        input: &Path,
        config: &JobConfig,
        output_dir: &Path,
        progress_tx: mpsc::Sender<JobProgress>,
    ) -> Result<Vec<PathBuf>, EngineError>;

    /// Validates that the engine is properly configured and ready.
    fn validate(&self) -> Result<(), EngineError>;
}
