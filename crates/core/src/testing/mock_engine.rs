//! Mock translation engine for testing.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{EngineError, TranslationEngine};
use crate::job::{JobConfig, JobProgress};

/// One scripted engine invocation.
#[derive(Debug, Clone)]
pub enum EngineStep {
    /// Write these file names into the output directory.
    Produce(Vec<String>),
    /// Exit cleanly without writing anything.
    ProduceNothing,
    /// Fail with a retryable error.
    Fail(String),
    /// Reject the document as unprocessable.
    Reject(String),
    /// Wait for the duration, then produce the default outputs.
    Stall(Duration),
    /// Report each update, then produce the default outputs.
    Progress(Vec<JobProgress>),
}

/// A recorded engine call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedTranslation {
    pub input: PathBuf,
    /// Input bytes as staged for the engine.
    pub input_bytes: Vec<u8>,
    pub config: JobConfig,
}

/// Mock implementation of the TranslationEngine trait.
///
/// Each call consumes the next scripted [`EngineStep`]; once the script is
/// empty every call produces the default outputs.
///
/// # Example
///
/// ```rust,ignore
/// use doctrans_core::testing::{EngineStep, MockEngine};
///
/// let engine = MockEngine::new();
/// engine.push(EngineStep::Fail("out of memory".into()));
/// engine.push(EngineStep::Produce(vec!["1.pdf".into()]));
/// ```
#[derive(Debug, Clone)]
pub struct MockEngine {
    script: Arc<Mutex<VecDeque<EngineStep>>>,
    calls: Arc<Mutex<Vec<RecordedTranslation>>>,
    default_outputs: Vec<String>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine producing `translated.pdf` by default.
    pub fn new() -> Self {
        Self::with_default_outputs(vec!["translated.pdf".to_string()])
    }

    pub fn with_default_outputs(outputs: Vec<String>) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            default_outputs: outputs,
        }
    }

    /// Append a step to the script.
    pub fn push(&self, step: EngineStep) {
        self.script.lock().unwrap().push_back(step);
    }

    /// Get all recorded calls.
    pub fn recorded_calls(&self) -> Vec<RecordedTranslation> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of engine invocations.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn write_outputs(
        output_dir: &Path,
        names: &[String],
    ) -> Result<Vec<PathBuf>, EngineError> {
        let mut outputs = Vec::with_capacity(names.len());
        for name in names {
            let path = output_dir.join(name);
            tokio::fs::write(&path, format!("%PDF-1.7 translated {}", name)).await?;
            outputs.push(path);
        }
        Ok(outputs)
    }
}

#[async_trait]
impl TranslationEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate_with_progress(
        &self,
        input: &Path,
        config: &JobConfig,
        output_dir: &Path,
        progress_tx: mpsc::Sender<JobProgress>,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let input_bytes = tokio::fs::read(input).await?;
        self.calls.lock().unwrap().push(RecordedTranslation {
            input: input.to_path_buf(),
            input_bytes,
            config: config.clone(),
        });

        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Self::write_outputs(output_dir, &self.default_outputs).await,
            Some(EngineStep::Produce(names)) => Self::write_outputs(output_dir, &names).await,
            Some(EngineStep::ProduceNothing) => Ok(Vec::new()),
            Some(EngineStep::Fail(reason)) => Err(EngineError::failed(reason)),
            Some(EngineStep::Reject(reason)) => Err(EngineError::unprocessable(reason)),
            Some(EngineStep::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Self::write_outputs(output_dir, &self.default_outputs).await
            }
            Some(EngineStep::Progress(updates)) => {
                for update in updates {
                    let _ = progress_tx.send(update).await;
                }
                Self::write_outputs(output_dir, &self.default_outputs).await
            }
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
