//! Session control endpoints.
//!
//! Provides HTTP endpoints for:
//! - Starting a recording session (POST /session/start)
//! - Stopping it (POST /session/stop)
//! - Reading session status (GET /session/status)

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::session::SessionError;

/// Commands crossing from API handlers to the session controller.
pub enum ApiCommand {
    StartSession {
        event_id: String,
        reply: oneshot::Sender<Result<u16, SessionError>>,
    },
    StopSession {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub event_id: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/session/status", get(session_status))
        .with_state(state)
}

async fn start_session(
    State(state): State<ApiState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<Value>> {
    info!("Start session requested for event {}", request.event_id);

    let (reply, rx) = oneshot::channel();
    state
        .tx
        .send(ApiCommand::StartSession {
            event_id: request.event_id,
            reply,
        })
        .await
        .map_err(|_| ApiError::internal("session controller is gone"))?;

    let port = rx
        .await
        .map_err(|_| ApiError::internal("session controller dropped the request"))??;

    let status = state.session_status.get().await;
    Ok(Json(json!({
        "phase": status.phase.as_str(),
        "relay_port": port,
    })))
}

async fn stop_session(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    info!("Stop session requested");

    let (reply, rx) = oneshot::channel();
    state
        .tx
        .send(ApiCommand::StopSession { reply })
        .await
        .map_err(|_| ApiError::internal("session controller is gone"))?;

    rx.await
        .map_err(|_| ApiError::internal("session controller dropped the request"))??;

    let status = state.session_status.get().await;
    Ok(Json(json!({
        "phase": status.phase.as_str(),
    })))
}

async fn session_status(State(state): State<ApiState>) -> Json<Value> {
    let status = state.session_status.get().await;
    Json(json!({
        "phase": status.phase.as_str(),
        "event_id": status.event_id,
        "relay_port": status.relay_port,
        "last_error": status.last_error,
    }))
}
