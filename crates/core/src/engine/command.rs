//! Engine that shells out to an external translation program.
//!
//! The program may report progress by printing `PROGRESS <current>/<total>`
//! lines on stdout; other stdout lines are ignored.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::config::EngineConfig;
use super::error::EngineError;
use super::traits::TranslationEngine;
use crate::job::{JobConfig, JobProgress};

/// Most stderr kept in an error reason.
const STDERR_TAIL_CHARS: usize = 2000;

/// Prefix of a progress line on the engine's stdout.
const PROGRESS_PREFIX: &str = "PROGRESS ";

pub struct CommandEngine {
    config: EngineConfig,
}

impl CommandEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn expand_args(&self, input: &Path, config: &JobConfig, output_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
                    .replace("{source_lang}", &config.source_lang)
                    .replace("{target_lang}", &config.target_lang)
                    .replace("{mode}", config.mode.as_str())
            })
            .collect()
    }

    fn stderr_tail(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        let text = text.trim();
        let count = text.chars().count();
        if count > STDERR_TAIL_CHARS {
            text.chars().skip(count - STDERR_TAIL_CHARS).collect()
        } else {
            text.to_string()
        }
    }

    /// Parse `PROGRESS 12/40`.
    fn parse_progress(line: &str) -> Option<JobProgress> {
        let (current, total) = line.trim().strip_prefix(PROGRESS_PREFIX)?.split_once('/')?;
        let current = current.trim().parse::<u64>().ok()?;
        let total = total.trim().parse::<u64>().ok()?;
        (total > 0).then(|| JobProgress::new(current, total))
    }

    /// Regular files in `dir`, sorted by name.
    async fn collect_outputs(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
        let mut outputs = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                outputs.push(entry.path());
            }
        }
        outputs.sort();
        Ok(outputs)
    }

    fn find_in_path(command: &Path) -> Option<PathBuf> {
        if command.components().count() > 1 {
            return command.is_file().then(|| command.to_path_buf());
        }
        std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(command))
                .find(|candidate| candidate.is_file())
        })
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::Unavailable {
                reason: format!("{} not found", self.config.command.display()),
            }
        } else {
            EngineError::Io(e)
        }
    }
}

#[async_trait]
impl TranslationEngine for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn translate_with_progress(
        &self,
        input: &Path,
        config: &JobConfig,
        output_dir: &Path,
        progress_tx: mpsc::Sender<JobProgress>,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let args = self.expand_args(input, config, output_dir);
        debug!("Running {} {:?}", self.config.command.display(), args);

        let options = serde_json::Value::Object(config.engine_options.clone()).to_string();
        // Dropping this future (timeout, shutdown) kills the engine process.
        let mut child = Command::new(&self.config.command)
            .args(&args)
            .envs(&self.config.env)
            .env("DOCTRANS_ENGINE_OPTIONS", options)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::failed("engine stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::failed("engine stderr not captured"))?;

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match Self::parse_progress(&line) {
                    Some(progress) => {
                        let _ = progress_tx.try_send(progress);
                    }
                    None => trace!("engine: {}", line),
                }
            }
            Ok::<_, std::io::Error>(())
        };
        // Both pipes are drained together so a chatty engine never blocks.
        let read_stderr = async {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        };
        let (stdout_result, stderr_result) = tokio::join!(read_stdout, read_stderr);
        stdout_result?;
        let stderr = stderr_result?;
        let status = child.wait().await?;

        if !status.success() {
            let stderr = Self::stderr_tail(&stderr);
            return match status.code() {
                Some(code) if self.config.unprocessable_exit_codes.contains(&code) => {
                    Err(EngineError::unprocessable(format!(
                        "exit code {}: {}",
                        code, stderr
                    )))
                }
                Some(code) => Err(EngineError::failed(format!(
                    "exit code {}: {}",
                    code, stderr
                ))),
                None => Err(EngineError::failed(format!(
                    "terminated by signal: {}",
                    stderr
                ))),
            };
        }

        let outputs = Self::collect_outputs(output_dir).await?;
        if outputs.is_empty() {
            warn!("{} exited cleanly but wrote no output", self.config.command.display());
        }
        Ok(outputs)
    }

    fn validate(&self) -> Result<(), EngineError> {
        match Self::find_in_path(&self.config.command) {
            Some(path) => {
                debug!("Engine command resolved to {}", path.display());
                Ok(())
            }
            None => Err(EngineError::Unavailable {
                reason: format!("{} not found", self.config.command.display()),
            }),
        }
    }
}
