//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! backed by the real orchestrator, SQLite store and queue, with the object
//! store and translation engine replaced by mocks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use doctrans_core::{
    testing::{MockArtifactStore, MockEngine},
    ArtifactGateway, Config, JobOrchestrator, JobStore, RetryPolicy, SqliteJobStore,
    SqliteWorkQueue, TranslationWorker, WorkQueue, WorkerPool,
};
use doctrans_server::state::AppState;

/// Re-export fixtures for test convenience
pub use doctrans_core::testing::fixtures;

/// Key of the document every fixture starts with.
pub const INPUT: &str = "uploads/report.pdf";

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/jobs", json!({
///         "input_ref": common::INPUT
///     })).await;
///
///     assert_eq!(response.status, StatusCode::ACCEPTED);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub orchestrator: Arc<JobOrchestrator>,
    /// Running worker pool, when requested
    pub pool: Option<Arc<WorkerPool>>,
    /// Mock object store holding [`INPUT`]
    pub artifacts: Arc<MockArtifactStore>,
    /// Mock engine - script attempt outcomes
    pub engine: MockEngine,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture without workers; submitted jobs stay QUEUED.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config::default();
        config.database.path = db_path.clone();

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let queue: Arc<dyn WorkQueue> = Arc::new(
            SqliteWorkQueue::new(&db_path, &fixtures::queue_config())
                .expect("Failed to create queue"),
        );

        let artifacts = Arc::new(MockArtifactStore::new());
        artifacts.insert(INPUT, fixtures::sample_pdf()).await;
        let engine = MockEngine::new();

        let orchestrator = Arc::new(JobOrchestrator::new(
            fixtures::orchestrator_config(2),
            store,
            queue,
            ArtifactGateway::new(
                artifacts.clone(),
                RetryPolicy::new(&fixtures::fast_retry()),
            ),
        ));

        let pool = if test_config.enable_pool {
            let worker = TranslationWorker::new(
                fixtures::worker_config(1),
                Arc::new(engine.clone()),
                ArtifactGateway::new(
                    artifacts.clone(),
                    RetryPolicy::new(&fixtures::fast_retry()),
                ),
            );
            let pool = Arc::new(WorkerPool::new(worker, Arc::clone(&orchestrator)));
            pool.start().await;
            Some(pool)
        } else {
            None
        };

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&orchestrator),
            pool.clone(),
        ));

        // Create router
        let router = doctrans_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            pool,
            artifacts,
            engine,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a GET request and return the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll a job until it reaches `status` or the timeout expires.
    pub async fn wait_for_status(&self, job_id: &str, status: &str, timeout: Duration) -> Value {
        let start = std::time::Instant::now();
        loop {
            let response = self.get(&format!("/api/v1/jobs/{}", job_id)).await;
            if response.body["status"] == status {
                return response.body;
            }
            assert!(
                start.elapsed() < timeout,
                "job {} never reached {}; last seen {}",
                job_id,
                status,
                response.body
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Path of the fixture's SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("test.db")
    }

    /// Stop the pool, if one was started.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.stop(Duration::from_secs(5)).await;
        }
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Start a one-slot worker pool against the mock engine
    pub enable_pool: bool,
}

impl TestConfig {
    /// Create config with the worker pool enabled.
    pub fn with_pool() -> Self {
        Self { enable_pool: true }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
