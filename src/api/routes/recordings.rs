//! Per-event recording record endpoints.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::db::{self, RecordingRepository};

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/:event_id", get(get_recording))
        .with_state(state)
}

async fn get_recording(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = db::open(&state.db_path)?;
    let record = RecordingRepository::get(&conn, &event_id)?
        .ok_or_else(|| ApiError::not_found(format!("no recording for event {event_id}")))?;
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}
