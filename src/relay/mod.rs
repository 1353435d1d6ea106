//! Capture relay server.
//!
//! A browser tab is the only context that can request tab-audio capture, so
//! the host runs this short-lived loopback server for each session: it serves
//! the capture page and accepts one WebSocket over which the page streams
//! audio chunks and status messages. Inbound traffic is decoded into
//! `RelayEvent`s for the session controller; the only host→page command is
//! `stop`.

pub mod protocol;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use protocol::{decode_frame, BrowserMessage, CaptureStatus, HostCommand, RelayEvent};

const CAPTURE_PAGE: &str = include_str!("../../assets/capture.html");

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no free relay port in {start}..{end}")]
    NoPortAvailable { start: u16, end: u16 },
    #[error("no active capture connection")]
    NotConnected,
}

struct RelayShared {
    events: mpsc::Sender<RelayEvent>,
    /// Sender for serialized frames to the current connection, if any.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Bumped per accepted connection so a replaced connection's teardown
    /// cannot be mistaken for the live one disconnecting.
    generation: AtomicU64,
}

struct Running {
    port: u16,
    serve_task: JoinHandle<()>,
    shared: Arc<RelayShared>,
}

pub struct RelayServer {
    events: mpsc::Sender<RelayEvent>,
    base_port: u16,
    scan_window: u16,
    running: Option<Running>,
}

impl RelayServer {
    pub fn new(events: mpsc::Sender<RelayEvent>, base_port: u16, scan_window: u16) -> Self {
        Self {
            events,
            base_port,
            scan_window,
            running: None,
        }
    }

    /// Bind the first available loopback port at or above the base port and
    /// start serving. Returns the bound port.
    pub async fn start(&mut self) -> Result<u16, RelayError> {
        if let Some(running) = &self.running {
            warn!("Relay already running on port {}", running.port);
            return Ok(running.port);
        }

        let (listener, port) = self.bind_first_free().await?;

        let shared = Arc::new(RelayShared {
            events: self.events.clone(),
            outbound: Mutex::new(None),
            generation: AtomicU64::new(0),
        });

        let app = router(shared.clone());
        let serve_task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!("Relay server failed: {}", err);
            }
        });

        info!("Capture relay listening on http://127.0.0.1:{}", port);
        self.running = Some(Running {
            port,
            serve_task,
            shared,
        });

        Ok(port)
    }

    /// Stop serving and drop the active connection. Safe to call when
    /// already stopped.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.serve_task.abort();
            info!("Capture relay on port {} stopped", running.port);
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.port)
    }

    /// Whether a capture connection is currently attached.
    pub async fn is_connected(&self) -> bool {
        match &self.running {
            Some(running) => running.shared.outbound.lock().await.is_some(),
            None => false,
        }
    }

    /// Send a command frame to the capture page.
    pub async fn send(&self, command: &HostCommand) -> Result<(), RelayError> {
        let running = self.running.as_ref().ok_or(RelayError::NotConnected)?;
        let guard = running.shared.outbound.lock().await;
        let sender = guard.as_ref().ok_or(RelayError::NotConnected)?;
        let frame = serde_json::to_string(command).unwrap_or_default();
        sender.send(frame).map_err(|_| RelayError::NotConnected)
    }

    async fn bind_first_free(&self) -> Result<(TcpListener, u16), RelayError> {
        let end = self.base_port.saturating_add(self.scan_window);
        for port in self.base_port..end {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => return Ok((listener, port)),
                Err(err) => debug!("Port {} unavailable: {}", port, err),
            }
        }
        Err(RelayError::NoPortAvailable {
            start: self.base_port,
            end,
        })
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn router(shared: Arc<RelayShared>) -> Router {
    Router::new()
        .route("/", get(capture_page))
        .route("/ws", get(ws_handler))
        .with_state(shared)
}

async fn capture_page() -> Html<&'static str> {
    Html(CAPTURE_PAGE)
}

async fn ws_handler(ws: WebSocketUpgrade, State(shared): State<Arc<RelayShared>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn handle_socket(socket: WebSocket, shared: Arc<RelayShared>) {
    let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut guard = shared.outbound.lock().await;
        if guard.replace(out_tx).is_some() {
            warn!("New capture connection replaces the previous one");
        }
    }
    // A fresh connection always resets session state.
    let _ = shared.events.send(RelayEvent::ConnectionReset).await;

    let (mut sender, mut receiver) = socket.split();

    let outbound = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(err) = sender.send(Message::Text(frame)).await {
                debug!("Relay outbound send failed: {}", err);
                break;
            }
        }
    });

    let inbound = {
        let shared = shared.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                if let Message::Text(text) = message {
                    if let Some(event) = decode_frame(&text) {
                        if shared.events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = inbound => {}
        _ = outbound => {}
    }

    // Only the live connection's teardown counts as a disconnect.
    if shared.generation.load(Ordering::SeqCst) == generation {
        shared.outbound.lock().await.take();
        let _ = shared.events.send(RelayEvent::Disconnected).await;
    }
    debug!("Capture connection closed (generation {})", generation);
}
