//! Local HTTP API: start a repost, inspect or clear the active job, read the
//! transition history. The MCP binary talks to this.

pub mod ws;

use crate::controller::Ack;
use crate::history::TransitionEntry;
use crate::job::{JobRecord, JobStatus, Rejection};
use crate::state::AppState;
use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type ApiState = Arc<AppState>;

type ApiError = (StatusCode, String);

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// API key authentication middleware.
/// Skips authentication for GET /api/health so the MCP binary can probe the server.
async fn api_key_auth(
    State(expected_key): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if request.uri().path() == "/api/health" {
        return Ok(next.run(request).await);
    }
    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(k) if k == expected_key => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/repost", axum::routing::post(start_repost))
        .route("/api/job", get(get_job).delete(clear_job))
        .route("/api/history", get(get_history))
        .route("/api/ws", get(ws::ws_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct RepostRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RepostResponse {
    pub accepted: bool,
    pub status: JobStatus,
}

fn validate_listing_url(raw: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Unsupported URL scheme '{}'", other)),
    }
}

fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::NoJob => StatusCode::NOT_FOUND,
        _ => StatusCode::CONFLICT,
    }
}

fn controller_error(e: crate::error::ReposterError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn start_repost(
    State(state): State<ApiState>,
    Json(req): Json<RepostRequest>,
) -> Result<(StatusCode, Json<RepostResponse>), ApiError> {
    validate_listing_url(&req.url).map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    tracing::info!("Repost requested for {}", req.url);

    match state.controller.start(req.url.trim()).await.map_err(controller_error)? {
        Ack::Accepted { status } => Ok((
            StatusCode::ACCEPTED,
            Json(RepostResponse {
                accepted: true,
                status,
            }),
        )),
        Ack::Rejected { rejection } => Err((rejection_status(&rejection), rejection.to_string())),
        Ack::Failed { message } => Err((StatusCode::INTERNAL_SERVER_ERROR, message)),
    }
}

async fn get_job(State(state): State<ApiState>) -> Result<Json<JobRecord>, ApiError> {
    state
        .controller
        .status()
        .await
        .map_err(controller_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No active job".to_string()))
}

/// Operator cleanup; also the way out of ERROR.
async fn clear_job(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    match state.controller.cleanup().await.map_err(controller_error)? {
        Ack::Accepted { .. } => Ok(StatusCode::NO_CONTENT),
        Ack::Rejected { rejection } => Err((rejection_status(&rejection), rejection.to_string())),
        Ack::Failed { message } => Err((StatusCode::INTERNAL_SERVER_ERROR, message)),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_history(
    State(state): State<ApiState>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<TransitionEntry>> {
    Json(state.history.recent(q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Build the full API app (router + optional API key auth + CORS).
/// Used by run_server and by integration tests.
pub fn app(state: ApiState, api_key: Option<String>) -> Router {
    use tower::limit::ConcurrencyLimitLayer;
    let base_router = router(state);
    if let Some(key) = api_key {
        base_router.route_layer(middleware::from_fn_with_state(key, api_key_auth))
    } else {
        base_router
    }
    .layer(ConcurrencyLimitLayer::new(32))
    .layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-api-key"),
            ]),
    )
}

pub async fn run_server(state: ApiState, port: u16, api_key: Option<String>) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .map_err(|e| format!("Failed to bind API port {}: {}", port, e))?;
    let app = app(state, api_key);
    tracing::info!("Reposter API listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}
