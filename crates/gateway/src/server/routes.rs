//! Request/response route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use protocol::{
    Ack, CloseRequest, InputRequest, ResizeRequest, SessionSummary, StartRequest, StartResponse,
};

use super::error::ApiError;
use super::validate;
use super::AppState;

/// `POST /api/ssh/start`: starts a session and answers once it is ready.
pub async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(request) = payload?;
    let params = validate::connect_params(request, state.settings.default_port)?;

    let (id, readiness) = state.gateway.start(params)?;
    readiness.await?;

    Ok(Json(StartResponse { id }))
}

/// `POST /api/ssh/input`
pub async fn input(
    State(state): State<AppState>,
    payload: Result<Json<InputRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(request) = payload?;
    let id = validate::session_id(&request.id)?;
    let data = request
        .data
        .ok_or_else(|| ApiError::validation("data is required"))?;

    state.gateway.write(id, data.as_bytes())?;
    Ok(Json(Ack::OK))
}

/// `POST /api/ssh/resize`
pub async fn resize(
    State(state): State<AppState>,
    payload: Result<Json<ResizeRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(request) = payload?;
    let id = validate::session_id(&request.id)?;
    let (cols, rows) = validate::dimensions(request.cols, request.rows)?;

    state.gateway.resize(id, cols, rows)?;
    Ok(Json(Ack::OK))
}

/// `POST /api/ssh/close`: idempotent.
pub async fn close(
    State(state): State<AppState>,
    payload: Result<Json<CloseRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(request) = payload?;
    let id = validate::session_id(&request.id)?;

    state.gateway.close(id);
    Ok(Json(Ack::OK))
}

/// `GET /api/ssh/sessions`
pub async fn sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let mut sessions: Vec<SessionSummary> = state
        .gateway
        .list()
        .iter()
        .map(|info| info.to_summary())
        .collect();
    sessions.sort_by_key(|s| s.created_at);
    Json(sessions)
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
