//! Transcription job endpoints.
//!
//! Provides HTTP endpoints for:
//! - Listing recent jobs (GET /jobs)
//! - Fetching one job (GET /jobs/:id)
//! - Retrying a terminal job (POST /jobs/:id/retry)

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::db::{self, JobRepository};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/retry", post(retry_job))
        .with_state(state)
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let conn = db::open(&state.db_path)?;
    let jobs = JobRepository::list_recent(&conn, query.limit)?;
    Ok(Json(serde_json::to_value(jobs).unwrap_or_default()))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = db::open(&state.db_path)?;
    let job = JobRepository::get(&conn, &id)?
        .ok_or_else(|| ApiError::not_found(format!("job {id} not found")))?;
    Ok(Json(serde_json::to_value(job).unwrap_or_default()))
}

async fn retry_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = state.queue.retry(&id).await?;
    Ok(Json(serde_json::to_value(job).unwrap_or_default()))
}
