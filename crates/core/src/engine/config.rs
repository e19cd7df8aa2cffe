//! Configuration for the command engine.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runs an external program once per attempt.
///
/// `args` may contain the placeholders `{input}`, `{output_dir}`,
/// `{source_lang}`, `{target_lang}` and `{mode}`. Progress is read from
/// `PROGRESS <current>/<total>` lines on the program's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_command")]
    pub command: PathBuf,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Exit codes meaning the input itself cannot be processed.
    #[serde(default = "default_unprocessable_exit_codes")]
    pub unprocessable_exit_codes: Vec<i32>,

    /// Extra environment variables for the engine process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_command() -> PathBuf {
    PathBuf::from("pdf2zh")
}

fn default_args() -> Vec<String> {
    [
        "{input}",
        "--lang-in",
        "{source_lang}",
        "--lang-out",
        "{target_lang}",
        "--output",
        "{output_dir}",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_unprocessable_exit_codes() -> Vec<i32> {
    vec![65] // EX_DATAERR
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            unprocessable_exit_codes: default_unprocessable_exit_codes(),
            env: BTreeMap::new(),
        }
    }
}
