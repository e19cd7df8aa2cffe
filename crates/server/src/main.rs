use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use doctrans_core::{
    load_config, validate_config, ArtifactGateway, ArtifactStore, CommandEngine, Config,
    FsArtifactStore, HttpArtifactStore, JobOrchestrator, JobStore, MetadataBackend,
    PostgrestJobStore, RetryPolicy, RetryingJobStore, SqliteJobStore, SqliteWorkQueue,
    StorageBackend, TranslationEngine, TranslationWorker, WorkQueue, WorkerPool,
};
use doctrans_server::api::create_router;
use doctrans_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long in-flight attempts get to finish on shutdown. Attempts still
/// running afterwards are reclaimed through their lease.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());

    let json = std::env::var("DOCTRANS_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("DOCTRANS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "doctrans {} starting (config {})",
        VERSION,
        &config_hash[..16]
    );
    info!("Database path: {:?}", config.database.path);

    let adapter_policy = RetryPolicy::new(&config.adapter_retry);

    let store = create_job_store(&config, adapter_policy.clone())?;
    info!("Job store initialized ({})", store.name());

    let queue: Arc<dyn WorkQueue> = Arc::new(
        SqliteWorkQueue::new(&config.database.path, &config.queue)
            .context("Failed to create work queue")?,
    );
    info!("Work queue initialized");

    let artifact_store = create_artifact_store(&config)?;
    info!("Artifact store initialized ({})", artifact_store.name());

    let engine: Arc<dyn TranslationEngine> = Arc::new(CommandEngine::new(config.engine.clone()));
    if let Err(e) = engine.validate() {
        // The service can still accept jobs; attempts will fail and retry.
        warn!("Translation engine is not ready: {}", e);
    }

    let orchestrator = Arc::new(JobOrchestrator::new(
        config.orchestrator.clone(),
        Arc::clone(&store),
        Arc::clone(&queue),
        ArtifactGateway::new(Arc::clone(&artifact_store), adapter_policy.clone()),
    ));
    orchestrator.start();
    info!("Orchestrator sweep started");

    let worker = TranslationWorker::new(
        config.worker.clone(),
        engine,
        ArtifactGateway::new(artifact_store, adapter_policy),
    );
    let pool = Arc::new(WorkerPool::new(worker, Arc::clone(&orchestrator)));
    pool.start().await;
    info!(
        "Worker pool started with {} slots",
        config.worker.concurrency
    );

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        Some(Arc::clone(&pool)),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    info!("Stopping worker pool...");
    pool.stop(SHUTDOWN_DRAIN).await;
    info!("Worker pool stopped");

    orchestrator.stop().await;
    info!("Orchestrator stopped");

    Ok(())
}

fn create_job_store(config: &Config, policy: RetryPolicy) -> Result<Arc<dyn JobStore>> {
    let inner: Arc<dyn JobStore> = match config.metadata.backend {
        MetadataBackend::Sqlite => Arc::new(
            SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
        ),
        MetadataBackend::Postgrest => {
            let postgrest = config
                .metadata
                .postgrest
                .as_ref()
                .context("metadata.backend = \"postgrest\" requires [metadata.postgrest]")?;
            info!("Using PostgREST job store at {}", postgrest.url);
            Arc::new(
                PostgrestJobStore::new(postgrest).context("Failed to create PostgREST client")?,
            )
        }
    };
    Ok(Arc::new(RetryingJobStore::new(inner, policy)))
}

fn create_artifact_store(config: &Config) -> Result<Arc<dyn ArtifactStore>> {
    match config.storage.backend {
        StorageBackend::Fs => {
            let root = &config.storage.fs.root;
            std::fs::create_dir_all(root)
                .with_context(|| format!("Failed to create storage root {:?}", root))?;
            Ok(Arc::new(FsArtifactStore::new(root.clone())))
        }
        StorageBackend::Http => {
            let http = config
                .storage
                .http
                .as_ref()
                .context("storage.backend = \"http\" requires [storage.http]")?;
            info!("Using HTTP object store at {}/{}", http.base_url, http.bucket);
            Ok(Arc::new(
                HttpArtifactStore::new(http).context("Failed to create HTTP object store")?,
            ))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
