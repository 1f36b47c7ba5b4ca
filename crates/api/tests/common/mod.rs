#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use evalhub_api::config::{EngineConfig, LogFormat, ServerConfig};
use evalhub_api::engine::{CollectOutcome, Engine};
use evalhub_api::router::build_app_router;
use evalhub_api::state::AppState;
use evalhub_backend::{BackendConfig, RetryConfig, ScriptedBackend, ServingConfig};
use evalhub_core::backend::completion_channel;
use evalhub_db::MemoryJobStore;
use evalhub_events::EventBus;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Engine tuning for tests: no real waiting between retries.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(20),
        batch_size: 32,
        concurrency: 4,
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        running_deadline: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(3600),
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
        log_format: LogFormat::Pretty,
        engine: test_engine_config(),
        backend: BackendConfig::Serving(ServingConfig::default()),
    }
}

/// The full application over an in-memory store and a scripted backend.
///
/// The engine is not spawned: tests step the dispatcher and deliver
/// completion signals explicitly, so every assertion sees a settled state.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryJobStore>,
    pub backend: Arc<ScriptedBackend>,
    pub events: Arc<EventBus>,
    pub engine: Engine,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryJobStore::new()))
    }

    /// Build around an existing store, e.g. one seeded with jobs that
    /// "survived" a restart.
    pub fn with_store(store: Arc<MemoryJobStore>) -> Self {
        let (signal_tx, signal_rx) = completion_channel();
        let backend = Arc::new(ScriptedBackend::new(signal_tx.clone()));
        Self::build(store, backend, (signal_tx, signal_rx))
    }

    /// Build around an existing backend and its completion channel.
    pub fn build(
        store: Arc<MemoryJobStore>,
        backend: Arc<ScriptedBackend>,
        channel: (
            evalhub_core::backend::SignalSender,
            evalhub_core::backend::SignalReceiver,
        ),
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let engine = Engine::new(
            store.clone(),
            backend.clone(),
            Arc::clone(&events),
            channel,
            test_engine_config(),
            CancellationToken::new(),
        );

        let config = test_config();
        let state = AppState {
            jobs: Arc::clone(&engine.service),
            config: Arc::new(config.clone()),
            event_bus: Arc::clone(&events),
        };
        let router = build_app_router(state, &config).expect("valid test config");

        Self {
            router,
            store,
            backend,
            events,
            engine,
        }
    }

    /// Run one dispatch cycle.
    pub async fn dispatch(&self) -> usize {
        self.engine
            .dispatcher
            .dispatch_pending()
            .await
            .expect("dispatch cycle")
    }

    /// Feed every queued completion signal to the collector.
    pub async fn deliver_signals(&mut self) -> Vec<CollectOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(signal) = self.engine.signals_mut().try_recv() {
            let outcome = self
                .engine
                .collector
                .handle_signal(signal)
                .await
                .expect("signal handled");
            outcomes.push(outcome);
        }
        outcomes
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

pub async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.expect("router answers")
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).expect("request");
    let response = send(router, request).await;
    let status = response.status();
    (status, body_json(response).await)
}

pub async fn post_json(router: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let response = send(router, request).await;
    let status = response.status();
    (status, body_json(response).await)
}

/// POST without a body. Returns only the status: 204 responses are empty.
pub async fn post_empty(router: &Router, uri: &str) -> (StatusCode, axum::response::Response) {
    let request = Request::post(uri).body(Body::empty()).expect("request");
    let response = send(router, request).await;
    (response.status(), response)
}

/// A create-job request body.
pub fn eval_request(name: &str) -> Value {
    serde_json::json!({
        "job_type": "EVALUATION",
        "name": name,
        "spec": {"model": "bart-large-cnn", "dataset": "xsum-sample", "metrics": ["rouge"]},
    })
}
