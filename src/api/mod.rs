//! Control API server.
//!
//! The UI's surface onto the pipeline:
//! - Session control (start/stop/status)
//! - Job listing and retry
//! - Per-event recording records

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tracing::info;

use crate::queue::JobQueue;
use crate::session::SessionStatusHandle;

pub use routes::session::ApiCommand;

/// Shared state handed to every route module.
#[derive(Clone)]
pub struct ApiState {
    pub tx: mpsc::Sender<ApiCommand>,
    pub session_status: SessionStatusHandle,
    pub queue: JobQueue,
    pub db_path: PathBuf,
}

pub struct ApiServer {
    port: u16,
    state: ApiState,
}

impl ApiServer {
    pub fn new(port: u16, state: ApiState) -> Self {
        Self { port, state }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            // Root and version endpoints
            .route("/", get(status))
            .route("/version", get(version))
            // Session control endpoints
            .merge(routes::session::router(self.state.clone()))
            // Other API routes
            .nest("/jobs", routes::jobs::router(self.state.clone()))
            .nest("/recordings", routes::recordings::router(self.state))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                      - Service info");
        info!("  GET  /version               - Version info");
        info!("  POST /session/start         - Start a recording session");
        info!("  POST /session/stop          - Stop the active session");
        info!("  GET  /session/status        - Session status");
        info!("  GET  /jobs                  - List recent transcription jobs");
        info!("  GET  /jobs/:id              - Get a single job");
        info!("  POST /jobs/:id/retry        - Retry a terminal job");
        info!("  GET  /recordings/:event_id  - Per-event recording record");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "tabscribe",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "tabscribe"
    }))
}
