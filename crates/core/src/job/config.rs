//! Metadata store configuration.

use serde::{Deserialize, Serialize};

/// Which job store backs the service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataBackend {
    /// Local SQLite file at `database.path`.
    #[default]
    Sqlite,
    /// Remote PostgREST endpoint (for example Supabase).
    Postgrest,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: MetadataBackend,

    /// Required when `backend = "postgrest"`.
    #[serde(default)]
    pub postgrest: Option<PostgrestConfig>,
}

/// PostgREST connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgrestConfig {
    /// Project URL, without the `/rest/v1` suffix.
    pub url: String,
    /// Service key sent as `apikey` and bearer token.
    pub api_key: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_table() -> String {
    "translation_jobs".to_string()
}

fn default_timeout() -> u64 {
    15
}
