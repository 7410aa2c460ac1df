//! Router construction, middleware, and the serve lifecycle.
//!
//! Startup sequence: fingerprints → document store (optional) → recovery →
//! event bus (optional) → worker pool → orchestrator → bind. Shutdown
//! drains the worker pool, which closes the browser pool last.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;

use crate::bus::{EventSink, NatsEventBus, NullSink};
use crate::config::Config;
use crate::extractor::ContentExtractor;
use crate::fingerprint::FingerprintProvider;
use crate::handlers::{self, AppState};
use crate::network::HttpClient;
use crate::orchestrator::CrawlOrchestrator;
use crate::registry::JobRegistry;
use crate::renderer::BrowserPool;
use crate::store::JobStore;
use crate::workerpool::WorkerPool;

pub struct ServerConfig {
    pub port: u16,
    pub nats_url: String,
    pub redis_url: String,
    pub api_key: String,
    pub headers_api_key: Option<String>,
}

pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let fingerprints = FingerprintProvider::new(config.headers_api_key.clone());
    fingerprints.prefetch();

    let http = Arc::new(HttpClient::new(
        Arc::clone(&fingerprints),
        Config::FETCH_TIMEOUT_SECS,
    )?);

    let store = match JobStore::connect(&config.redis_url).await {
        Ok(store) => Some(store),
        Err(err) => {
            tracing::warn!(error = %err, "document store unavailable, running in-memory only");
            None
        }
    };
    let registry = JobRegistry::new(store);
    let recovered = registry.recover().await;
    if recovered > 0 {
        tracing::info!(recovered, "recovered interrupted jobs from previous run");
    }

    let bus = match NatsEventBus::connect(&config.nats_url).await {
        Ok(bus) => Some(bus),
        Err(err) => {
            tracing::warn!(error = %err, "event bus unavailable, events will be dropped");
            None
        }
    };
    let sink: Arc<dyn EventSink> = match &bus {
        Some(bus) => Arc::new(bus.clone()),
        None => Arc::new(NullSink),
    };

    let max_workers = WorkerPool::optimal_workers();
    let browsers = Arc::new(BrowserPool::new((max_workers / 2).max(1)));
    let extractor = Arc::new(ContentExtractor::new(
        Arc::clone(&http),
        Arc::clone(&browsers),
    ));
    let pool = WorkerPool::new(extractor, Arc::clone(&browsers), max_workers);
    tracing::info!(max_workers, "worker pool initialized");

    let orchestrator = Arc::new(CrawlOrchestrator::new(
        http,
        browsers,
        Arc::clone(&sink),
    ));

    let state = AppState {
        registry,
        pool: Arc::clone(&pool),
        orchestrator,
        sink,
        bus,
        api_key: Arc::new(config.api_key),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down worker pool");
    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::handle_health))
        .route("/health", get(handlers::handle_health))
        .route("/crawl", post(handlers::handle_crawl))
        .route("/content", post(handlers::handle_content))
        .route("/jobs", get(handlers::handle_jobs))
        .route("/jobs/{id}", get(handlers::handle_job_status))
        .route("/ws/{id}", get(handlers::handle_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

/// Paths served without an API key: health, docs-free root, preflight,
/// and the WebSocket endpoint (browser clients cannot set headers there).
fn auth_exempt(method: &Method, path: &str) -> bool {
    method == Method::OPTIONS || path == "/" || path == "/health" || path.starts_with("/ws/")
}

async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if auth_exempt(&method, &path) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).to_string())
        });

    if provided.as_deref() != Some(state.api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": "Invalid or missing API key. Use X-API-Key header or Authorization: Bearer token"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;

    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization, X-API-Key"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    response
}
