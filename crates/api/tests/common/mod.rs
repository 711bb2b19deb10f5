#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jobline_core::resilience::{BreakerConfig, GuardConfig, RetryPolicy};
use jobline_db::InMemoryJobStore;
use jobline_pipeline::{ExternalService, MockExternalService, PipelineConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use jobline_api::config::{EngineConfig, ServerConfig};
use jobline_api::engine::Engine;
use jobline_api::router::build_app_router;
use jobline_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Engine settings scaled down to milliseconds.
///
/// The guard gives up after two attempts and opens after two failures so
/// breaker behaviour shows up within a single short job.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        worker_concurrency: 4,
        max_redeliveries: 3,
        status_poll_interval: Duration::from_millis(20),
        redelivery_backoff: RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: false,
        },
        guard: GuardConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            breaker: BreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            },
        },
        pipeline: PipelineConfig {
            step_delay: Duration::from_millis(10),
            http_timeout: Duration::from_secs(2),
        },
        external_failure_rate: 0.0,
    }
}

/// Mock external service with no latency.
pub fn instant_external(failure_rate: f64) -> Arc<MockExternalService> {
    Arc::new(MockExternalService::new(failure_rate).with_latency(Duration::ZERO, Duration::ZERO))
}

/// Application under test: router, engine and the in-memory store behind
/// them. Workers are only running after [`TestApp::start_workers`].
pub struct TestApp {
    pub app: Router,
    pub engine: Engine,
    pub store: Arc<InMemoryJobStore>,
    shutdown: CancellationToken,
}

impl TestApp {
    pub fn new(store: Arc<InMemoryJobStore>, external: Arc<dyn ExternalService>) -> Self {
        let config = test_config();
        let engine = Engine::new(store.clone(), external, &fast_engine_config());
        let shutdown = CancellationToken::new();
        let state = AppState::new(&engine, shutdown.clone());
        let app = build_app_router(state, &config).expect("valid test config");
        Self {
            app,
            engine,
            store,
            shutdown,
        }
    }

    pub fn start_workers(&self) {
        tokio::spawn(Arc::clone(&self.engine.dispatcher).run(self.shutdown.clone()));
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Fresh in-memory app with workers running and a never-failing service.
pub fn spawn_app() -> TestApp {
    let app = TestApp::new(Arc::new(InMemoryJobStore::new()), instant_external(0.0));
    app.start_workers();
    app
}

/// Same as [`spawn_app`] but nothing consumes the delivery queue.
pub fn spawn_app_without_workers() -> TestApp {
    TestApp::new(Arc::new(InMemoryJobStore::new()), instant_external(0.0))
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    let request = Request::delete(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Job helpers
// ---------------------------------------------------------------------------

/// Submit a task and return its id.
pub async fn submit(app: &TestApp, input: serde_json::Value) -> String {
    let response = post_json(app.router(), "/api/v1/tasks", input).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["data"]["task_id"].as_str().unwrap().to_string()
}

/// `data` of `GET /api/v1/tasks/{id}`.
pub async fn task(app: &TestApp, id: &str) -> serde_json::Value {
    let response = get(app.router(), &format!("/api/v1/tasks/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["data"].clone()
}

/// Poll the task until it reaches `status`, panicking after five seconds.
pub async fn wait_for_status(app: &TestApp, id: &str, status: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = task(app, id).await;
        if current["status"] == status {
            return current;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} never reached {status}, last seen: {current}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Log messages of a task view, in order.
pub fn log_messages(task: &serde_json::Value) -> Vec<String> {
    task["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["message"].as_str().unwrap().to_string())
        .collect()
}
