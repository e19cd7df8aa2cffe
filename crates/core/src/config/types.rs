use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::artifact::{FsStorageConfig, StorageConfig};
use crate::engine::EngineConfig;
use crate::job::{MetadataBackend, MetadataConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;
use crate::retry::RetryConfig;
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Retry policy for object store and job store calls.
    #[serde(default)]
    pub adapter_retry: RetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite file holding the work queue, and the jobs table when
    /// `metadata.backend = "sqlite"`.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("doctrans.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub metadata: SanitizedMetadataConfig,
    pub storage: SanitizedStorageConfig,
    pub engine: SanitizedEngineConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub adapter_retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedMetadataConfig {
    pub backend: MetadataBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgrest: Option<SanitizedPostgrestConfig>,
}

/// Sanitized PostgREST config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedPostgrestConfig {
    pub url: String,
    pub table: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub backend: String,
    pub fs: FsStorageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<SanitizedHttpStorageConfig>,
}

/// Sanitized HTTP object store config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedHttpStorageConfig {
    pub base_url: String,
    pub bucket: String,
    pub token_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub timeout_secs: u64,
}

/// Sanitized engine config. Environment values may hold provider
/// credentials, so only the variable names are shown.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEngineConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub unprocessable_exit_codes: Vec<i32>,
    pub env_keys: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            metadata: SanitizedMetadataConfig {
                backend: config.metadata.backend,
                postgrest: config
                    .metadata
                    .postgrest
                    .as_ref()
                    .map(|p| SanitizedPostgrestConfig {
                        url: p.url.clone(),
                        table: p.table.clone(),
                        api_key_configured: !p.api_key.is_empty(),
                        timeout_secs: p.timeout_secs,
                    }),
            },
            storage: SanitizedStorageConfig {
                backend: match config.storage.backend {
                    crate::artifact::StorageBackend::Fs => "fs".to_string(),
                    crate::artifact::StorageBackend::Http => "http".to_string(),
                },
                fs: config.storage.fs.clone(),
                http: config
                    .storage
                    .http
                    .as_ref()
                    .map(|h| SanitizedHttpStorageConfig {
                        base_url: h.base_url.clone(),
                        bucket: h.bucket.clone(),
                        token_configured: h.token.as_ref().is_some_and(|t| !t.is_empty()),
                        public_url: h.public_url.clone(),
                        timeout_secs: h.timeout_secs,
                    }),
            },
            engine: SanitizedEngineConfig {
                command: config.engine.command.clone(),
                args: config.engine.args.clone(),
                unprocessable_exit_codes: config.engine.unprocessable_exit_codes.clone(),
                env_keys: config.engine.env.keys().cloned().collect(),
            },
            worker: config.worker.clone(),
            queue: config.queue.clone(),
            orchestrator: config.orchestrator.clone(),
            adapter_retry: config.adapter_retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{HttpStorageConfig, StorageBackend};
    use crate::job::PostgrestConfig;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "doctrans.db");
        assert_eq!(config.metadata.backend, MetadataBackend::Sqlite);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.orchestrator.max_attempts, 2);
        assert_eq!(config.adapter_retry.max_attempts, 3);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/jobs.sqlite"

[metadata]
backend = "postgrest"

[metadata.postgrest]
url = "https://project.supabase.co"
api_key = "service-key"

[storage]
backend = "http"

[storage.http]
base_url = "https://objects.example.com"
bucket = "documents"
token = "secret-token"

[engine]
command = "/usr/local/bin/pdf2zh"
unprocessable_exit_codes = [65, 66]

[engine.env]
OPENAI_API_KEY = "sk-test"

[worker]
concurrency = 4

[orchestrator]
max_attempts = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path.to_str().unwrap(), "/data/jobs.sqlite");
        assert_eq!(config.metadata.backend, MetadataBackend::Postgrest);
        assert_eq!(
            config.metadata.postgrest.as_ref().unwrap().table,
            "translation_jobs"
        );
        assert_eq!(config.storage.backend, StorageBackend::Http);
        assert_eq!(config.storage.http.as_ref().unwrap().bucket, "documents");
        assert_eq!(config.engine.unprocessable_exit_codes, vec![65, 66]);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.orchestrator.max_attempts, 3);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::default();
        config.metadata.postgrest = Some(PostgrestConfig {
            url: "https://project.supabase.co".to_string(),
            api_key: "service-key".to_string(),
            table: "translation_jobs".to_string(),
            timeout_secs: 15,
        });
        config.storage.http = Some(HttpStorageConfig {
            base_url: "https://objects.example.com".to_string(),
            bucket: "documents".to_string(),
            token: Some("secret-token".to_string()),
            public_url: None,
            timeout_secs: 60,
        });
        config
            .engine
            .env
            .insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());

        let sanitized = SanitizedConfig::from(&config);
        let postgrest = sanitized.metadata.postgrest.as_ref().unwrap();
        assert!(postgrest.api_key_configured);
        let http = sanitized.storage.http.as_ref().unwrap();
        assert!(http.token_configured);
        assert_eq!(sanitized.engine.env_keys, vec!["OPENAI_API_KEY"]);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("service-key"));
        assert!(!json.contains("secret-token"));
        assert!(!json.contains("sk-test"));
    }

    #[test]
    fn test_sanitized_config_defaults() {
        let sanitized = SanitizedConfig::from(&Config::default());
        assert_eq!(sanitized.server.port, 8080);
        assert_eq!(sanitized.storage.backend, "fs");
        assert!(sanitized.metadata.postgrest.is_none());
        assert!(sanitized.storage.http.is_none());
    }
}
