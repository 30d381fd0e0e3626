//! ==============================================================================
//! server.rs - http surface
//! ==============================================================================
//!
//! purpose:
//!     axum routes for the field gateway, the dashboard and period control.
//!
//! routes:
//!     POST /lora                  ingest {"message": "k:v,k:v"}
//!     GET  /lora/latest           latest reading, flat json
//!     GET  /lora/history?limit=N  last N readings, oldest first
//!     GET  /stream                server-sent events (update / heartbeat)
//!     POST /periods/start         {"name"?, "notes"?}
//!     POST /periods/stop
//!     GET  /periods/status
//!     GET  /periods               newest first
//!     GET  /periods/:id           period + readings + has_coordinates
//!     GET  /periods/:id/export    csv attachment
//!     GET  /test-data             synthetic reading through the pipeline
//!     GET  /health
//!
//! errors:
//!     every failure is `{"status": "error", "message": ...}` with a 4xx/5xx
//!     status; see `ApiError`.
//!
//! ==============================================================================

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::domain::{Period, Reading};
use crate::error::{ExportError, IngestError, PeriodError, StoreError};
use crate::export;
use crate::period::PeriodStatus;
use crate::service::{self, PeriodDetail, TelemetryService};

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub service: TelemetryService,
    pub config: Arc<HubConfig>,
}

impl AppState {
    pub fn new(service: TelemetryService, config: HubConfig) -> Self {
        Self { service, config: Arc::new(config) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/lora", post(ingest_handler))
        .route("/lora/latest", get(latest_handler))
        .route("/lora/history", get(history_handler))
        .route("/stream", get(stream_handler))
        .route("/periods", get(list_periods_handler))
        .route("/periods/start", post(start_period_handler))
        .route("/periods/stop", post(stop_period_handler))
        .route("/periods/status", get(period_status_handler))
        .route("/periods/:id", get(period_detail_handler))
        .route("/periods/:id/export", get(export_period_handler))
        .route("/test-data", get(test_data_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ingest(IngestError::InvalidEnvelope(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Period(PeriodError::Conflict { .. }) => StatusCode::CONFLICT,
            ApiError::Period(PeriodError::NotActive) => StatusCode::BAD_REQUEST,
            ApiError::Period(PeriodError::NotFound(_)) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Ingest(IngestError::Store(_))
            | ApiError::Period(PeriodError::Store(_))
            | ApiError::Store(_)
            | ApiError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }

        let mut body = json!({ "status": "error", "message": self.to_string() });
        if let ApiError::Period(PeriodError::Conflict { active_id }) = &self {
            body["active_period_id"] = json!(active_id);
        }
        (status, Json(body)).into_response()
    }
}

// ==============================================================================
// readings
// ==============================================================================

/// field gateway upload
async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    debug!(raw = %String::from_utf8_lossy(&body), "received");
    state.service.ingest(&body).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn latest_handler(State(state): State<AppState>) -> Json<Reading> {
    Json(state.service.latest())
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
}

async fn history_handler(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let Query(params) = params?;
    let limit = state.config.history_limit(params.limit);
    let readings = state.service.readings.recent(limit).await?;
    debug!(count = readings.len(), "returning history");
    Ok(Json(readings))
}

/// live updates; the subscription is dropped, and deregistered, when the client goes away
async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.service.hub.subscribe();
    Sse::new(subscription.map(|notification| Ok(notification.to_event())))
}

async fn test_data_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.config.test_data.enabled {
        return Err(ApiError::NotFound("test data endpoint disabled".into()));
    }

    let reading = service::synthesize(&mut rand::thread_rng());
    let stored = state.service.record(reading).await?;
    Ok(Json(json!({ "status": "success", "data": stored })))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "subscribers": state.service.hub.subscriber_count(),
        "active_period": state.service.periods.current(),
    }))
}

// ==============================================================================
// periods
// ==============================================================================

#[derive(Debug, Default, Deserialize)]
struct StartPeriodRequest {
    name: Option<String>,
    notes: Option<String>,
}

async fn start_period_handler(
    State(state): State<AppState>,
    payload: Option<Json<StartPeriodRequest>>,
) -> Result<Json<Period>, ApiError> {
    let Json(request) = payload.unwrap_or_default();
    let period = state.service.periods.start(request.name, request.notes).await?;
    Ok(Json(period))
}

async fn stop_period_handler(State(state): State<AppState>) -> Result<Json<Period>, ApiError> {
    Ok(Json(state.service.periods.stop().await?))
}

async fn period_status_handler(State(state): State<AppState>) -> Json<PeriodStatus> {
    Json(state.service.periods.status())
}

async fn list_periods_handler(State(state): State<AppState>) -> Result<Json<Vec<Period>>, ApiError> {
    Ok(Json(state.service.readings.history().list_periods().await?))
}

async fn period_detail_handler(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PeriodDetail>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.period_detail(id).await?))
}

async fn export_period_handler(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let detail = state.service.period_detail(id).await?;
    let csv = export::to_csv(&detail.readings)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export::file_name(id)),
            ),
        ],
        csv,
    ))
}
