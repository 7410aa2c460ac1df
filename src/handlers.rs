//! HTTP and WebSocket request handlers.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventSink, JobEmitter, NatsEventBus};
use crate::models::{
    generate_job_id, is_valid_job_id, ContentBatchResponse, ContentRequest, CrawlEvent,
    CrawlRequest, CrawlResponse, EventKind, Job, JobStatus, WsMessage,
};
use crate::orchestrator::CrawlOrchestrator;
use crate::registry::{JobRegistry, RegistryError};
use crate::url_utils;
use crate::workerpool::{PoolError, WorkerPool};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub pool: Arc<WorkerPool>,
    pub orchestrator: Arc<CrawlOrchestrator>,
    pub sink: Arc<dyn EventSink>,
    pub bus: Option<NatsEventBus>,
    pub api_key: Arc<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// POST /crawl: validate, register the job, and detach the executor.
pub async fn handle_crawl(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CrawlRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON"),
    };

    if request.url.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "URL is required");
    }
    if !url_utils::is_absolute_http(&request.url) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "url must be an absolute http(s) URL",
        );
    }

    let job_id = match &request.job_id {
        Some(custom) => {
            if !is_valid_job_id(custom) {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid job_id format. Use alphanumeric characters, hyphens, and underscores only",
                );
            }
            if state.registry.contains(custom).await {
                return error_response(
                    StatusCode::CONFLICT,
                    "Job ID already exists. Choose a different job_id or omit it for auto-generation",
                );
            }
            custom.clone()
        }
        None => generate_job_id(),
    };

    let job = Job::new(&job_id, request.clone());
    if let Err(RegistryError::Conflict) = state.registry.create(job).await {
        return error_response(
            StatusCode::CONFLICT,
            "Job ID already exists. Choose a different job_id or omit it for auto-generation",
        );
    }

    spawn_executor(state, request, job_id.clone());

    Json(CrawlResponse {
        job_id,
        status: "accepted".to_string(),
        message: "Crawl job started successfully".to_string(),
    })
    .into_response()
}

/// Detached per-job executor task. The terminal event is published only
/// after the registry transition, so pollers never observe an event
/// before the state it announces.
fn spawn_executor(state: AppState, request: CrawlRequest, job_id: String) {
    tokio::spawn(async move {
        let emitter = JobEmitter::new(Arc::clone(&state.sink), &job_id);
        emitter.progress("Starting crawl...").await;

        match state.orchestrator.execute(&request, &job_id).await {
            Ok(result) => {
                let total = result.urls.len();
                tracing::info!(job_id = %job_id, total, "crawl job completed");
                if state.registry.mark_completed(&job_id, result).await.is_some() {
                    emitter
                        .emit(
                            CrawlEvent::new(EventKind::Completed, &job_id)
                                .with_progress(format!("Crawl completed! Found {} URLs", total))
                                .with_total(total),
                        )
                        .await;
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "crawl job failed");
                if state
                    .registry
                    .mark_failed(&job_id, err.to_string())
                    .await
                    .is_some()
                {
                    emitter
                        .emit(
                            CrawlEvent::new(EventKind::Error, &job_id)
                                .with_progress(format!("Crawl failed: {}", err))
                                .with_error(err.to_string()),
                        )
                        .await;
                }
            }
        }
    });
}

/// POST /content: tiered extraction for one or more URLs.
pub async fn handle_content(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ContentRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON"),
    };

    let urls = request.target_urls();
    if urls.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Either 'url' or 'urls' is required",
        );
    }

    match state.pool.process_content_urls(&urls).await {
        Ok(results) => Json(ContentBatchResponse::from_results(results)).into_response(),
        Err(PoolError::Overloaded) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Service temporarily unavailable",
        ),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub status: Option<String>,
}

/// GET /jobs: recent jobs, newest first.
pub async fn handle_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match JobStatus::parse(raw) {
            Some(status) => Some(status),
            None => return Json(Vec::<Job>::new()).into_response(),
        },
    };

    let jobs = state.registry.list(status, query.limit).await;
    Json(jobs).into_response()
}

/// GET /jobs/{id}: single job record.
pub async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get(&id).await {
        Some(job) => Json(job).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Job not found"),
    }
}

/// GET / and /health: service and dependency status.
pub async fn handle_health(State(state): State<AppState>) -> Response {
    let store_connected = state.registry.has_store();
    let bus_connected = state.bus.is_some();
    let status = if store_connected { "healthy" } else { "degraded" };
    let store_status = if store_connected { "connected" } else { "disconnected" };
    let bus_status = if bus_connected { "connected" } else { "disconnected" };

    Json(json!({
        "status": status,
        "timestamp": chrono::Utc::now(),
        "services": {
            "store": { "status": store_status, "ping": store_connected },
            "bus": { "status": bus_status, "ping": bus_connected },
        },
        "memory": {
            "active_jobs": state.registry.active_count().await,
        },
    }))
    .into_response()
}

/// GET /ws/{id}: live event stream for one job.
pub async fn handle_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| ws_session(state, id, socket))
}

async fn ws_session(state: AppState, job_id: String, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    if send_json(&mut sender, &WsMessage::connected(&job_id)).await.is_err() {
        return;
    }

    let Some(bus) = state.bus.clone() else {
        let _ = send_json(
            &mut sender,
            &WsMessage::error(&job_id, "Event bus unavailable"),
        )
        .await;
        return;
    };

    let mut events = match bus.subscribe_job(&job_id).await {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!(job_id = %job_id, error = %err, "job subscription failed");
            let _ = send_json(
                &mut sender,
                &WsMessage::error(&job_id, "Failed to create event queue"),
            )
            .await;
            return;
        }
    };

    // Client reads are only used to detect disconnect.
    let disconnected = CancellationToken::new();
    let reader_stop = disconnected.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            if message.is_err() {
                break;
            }
        }
        reader_stop.cancel();
    });

    loop {
        tokio::select! {
            _ = disconnected.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = event.kind.is_terminal();
                if send_json(&mut sender, &WsMessage::from(event)).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
        }
    }

    reader.abort();
    tracing::debug!(job_id = %job_id, "websocket session closed");
}

async fn send_json<S>(sender: &mut S, message: &impl Serialize) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let payload = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(payload.into())).await.map_err(|_| ())
}
