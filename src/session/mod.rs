//! Recording session state machine.
//!
//! Orchestrates one capture at a time: permission gating, relay server
//! lifecycle, opening the capture page, buffering the streamed chunks, and
//! on the stop handshake, finalizing the buffers into files and handing
//! them to the job queue. All collaborators are injected so the machine can
//! be driven entirely by fakes in tests.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, RecordingRepository};
use crate::queue::JobQueue;
use crate::relay::{HostCommand, RelayError, RelayEvent, RelayServer};

pub mod status;

pub use status::{SessionPhase, SessionStatus, SessionStatusHandle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a recording session is already active (event {0})")]
    AlreadyActive(String),
    #[error("no recording in progress")]
    NotRecording,
    #[error("no active capture connection to stop")]
    NoCapture,
    #[error("audio capture permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("could not open the capture page: {0}")]
    PageOpen(String),
    #[error("failed to finalize recording: {0}")]
    Finalize(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    NotDetermined,
    Denied,
}

/// OS-level audio/screen permission gate.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(&self) -> PermissionState;
    /// Prompt the user; returns whether permission was granted.
    async fn request(&self) -> bool;
}

/// Gate for platforms where the browser performs the real capture prompt and
/// the host needs nothing up front.
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn check(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request(&self) -> bool {
        true
    }
}

/// Opens the capture page in the user's browser.
pub trait PageOpener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

pub struct SystemOpener;

impl PageOpener for SystemOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        #[cfg(target_os = "macos")]
        let opener = "open";
        #[cfg(all(unix, not(target_os = "macos")))]
        let opener = "xdg-open";
        #[cfg(windows)]
        let opener = "explorer";

        std::process::Command::new(opener)
            .arg(url)
            .spawn()
            .map_err(|err| anyhow::anyhow!("{opener} failed: {err}"))?;
        Ok(())
    }
}

/// The stateful record of one in-progress capture attempt.
struct RecordingSession {
    event_id: String,
    phase: SessionPhase,
    mic_buffer: Vec<Vec<u8>>,
    tab_buffer: Vec<Vec<u8>>,
}

impl RecordingSession {
    fn new(event_id: String) -> Self {
        Self {
            event_id,
            phase: SessionPhase::WaitingForCapture,
            mic_buffer: Vec::new(),
            tab_buffer: Vec::new(),
        }
    }
}

pub struct SessionController {
    relay: RelayServer,
    permissions: Box<dyn PermissionGate>,
    opener: Box<dyn PageOpener>,
    queue: JobQueue,
    status: SessionStatusHandle,
    session: Option<RecordingSession>,
    recordings_dir: PathBuf,
    db_path: PathBuf,
    model: String,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relay: RelayServer,
        permissions: Box<dyn PermissionGate>,
        opener: Box<dyn PageOpener>,
        queue: JobQueue,
        status: SessionStatusHandle,
        recordings_dir: PathBuf,
        db_path: PathBuf,
        model: String,
    ) -> Self {
        Self {
            relay,
            permissions,
            opener,
            queue,
            status,
            session: None,
            recordings_dir,
            db_path,
            model,
        }
    }

    /// Begin a session for the given event. Returns the relay port the
    /// capture page was opened against.
    pub async fn start(&mut self, event_id: &str) -> Result<u16, SessionError> {
        if let Some(session) = &self.session {
            return Err(SessionError::AlreadyActive(session.event_id.clone()));
        }

        info!("Starting recording session for event {}", event_id);
        self.status.begin(event_id).await;

        match self.permissions.check().await {
            PermissionState::Granted => {}
            PermissionState::NotDetermined => {
                self.status
                    .set_phase(SessionPhase::RequestingPermissions)
                    .await;
                if !self.permissions.request().await {
                    self.abort("audio capture permission denied").await;
                    return Err(SessionError::PermissionDenied);
                }
            }
            PermissionState::Denied => {
                self.abort("audio capture permission denied").await;
                return Err(SessionError::PermissionDenied);
            }
        }

        let port = match self.relay.start().await {
            Ok(port) => port,
            Err(err) => {
                let message = err.to_string();
                self.abort(&message).await;
                return Err(err.into());
            }
        };
        self.status.set_relay_port(port).await;

        let url = format!("http://127.0.0.1:{port}/?event={event_id}");
        if let Err(err) = self.opener.open(&url) {
            let message = err.to_string();
            self.abort(&message).await;
            return Err(SessionError::PageOpen(message));
        }

        self.session = Some(RecordingSession::new(event_id.to_string()));
        self.status.set_phase(SessionPhase::WaitingForCapture).await;
        info!("Capture page opened at {}", url);

        Ok(port)
    }

    /// Request a stop. Finalization happens later, when the capture page
    /// confirms with its `stopped` status.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        let session = match &mut self.session {
            Some(session) if session.phase == SessionPhase::Recording => session,
            _ => return Err(SessionError::NotRecording),
        };
        let event_id = session.event_id.clone();

        if !self.relay.is_connected().await {
            self.abort("stop requested but the capture connection is gone")
                .await;
            return Err(SessionError::NoCapture);
        }

        if self.relay.send(&HostCommand::stop(&event_id)).await.is_err() {
            self.abort("stop requested but the capture connection is gone")
                .await;
            return Err(SessionError::NoCapture);
        }

        if let Some(session) = &mut self.session {
            session.phase = SessionPhase::Stopping;
        }
        self.status.set_phase(SessionPhase::Stopping).await;
        info!("Stop command sent for event {}", event_id);

        Ok(())
    }

    /// Feed one relay event into the machine.
    pub async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Started { event_id } => {
                match &mut self.session {
                    Some(session)
                        if session.event_id == event_id
                            && session.phase == SessionPhase::WaitingForCapture =>
                    {
                        session.phase = SessionPhase::Recording;
                        self.status.set_phase(SessionPhase::Recording).await;
                        info!("Recording started for event {}", event_id);
                    }
                    _ => debug!("Ignoring recording_started for {}", event_id),
                }
            }
            RelayEvent::MicChunk { event_id, bytes } => {
                if let Some(session) = self.active_buffering(&event_id) {
                    session.mic_buffer.push(bytes);
                }
            }
            RelayEvent::TabChunk { event_id, bytes } => {
                if let Some(session) = self.active_buffering(&event_id) {
                    session.tab_buffer.push(bytes);
                }
            }
            RelayEvent::Stopped { event_id } => {
                let matches = self.session.as_ref().is_some_and(|session| {
                    session.event_id == event_id
                        && matches!(
                            session.phase,
                            SessionPhase::Recording | SessionPhase::Stopping
                        )
                });
                if matches {
                    if let Err(err) = self.finalize().await {
                        warn!("Finalization failed: {}", err);
                    }
                } else {
                    debug!("Ignoring stopped for {}", event_id);
                }
            }
            RelayEvent::CaptureError { event_id, message } => {
                let matches = self
                    .session
                    .as_ref()
                    .is_some_and(|session| session.event_id == event_id);
                if matches {
                    warn!("Capture page reported an error: {}", message);
                    self.abort(&message).await;
                } else {
                    debug!("Ignoring capture error for {}: {}", event_id, message);
                }
            }
            RelayEvent::Disconnected => {
                if let Some(session) = &self.session {
                    if session.phase == SessionPhase::Recording {
                        // Deliberately not finalizing: the explicit stop
                        // handshake is the only finalization trigger, so a
                        // transient blip cannot flush a recording early.
                        warn!(
                            "Capture connection lost while recording event {}",
                            session.event_id
                        );
                    }
                }
            }
            RelayEvent::ConnectionReset => {
                if let Some(session) = &mut self.session {
                    if !session.mic_buffer.is_empty() || !session.tab_buffer.is_empty() {
                        warn!("New capture connection, discarding partial buffers");
                    }
                    session.mic_buffer.clear();
                    session.tab_buffer.clear();
                }
            }
        }
    }

    pub fn status_handle(&self) -> SessionStatusHandle {
        self.status.clone()
    }

    fn active_buffering(&mut self, event_id: &str) -> Option<&mut RecordingSession> {
        self.session.as_mut().filter(|session| {
            session.event_id == event_id
                && matches!(
                    session.phase,
                    SessionPhase::Recording | SessionPhase::Stopping
                )
        })
    }

    /// Turn the buffered chunks into files, enqueue the job, and return to
    /// idle. Empty buffers are skipped; a single-stream job is degraded but
    /// valid.
    async fn finalize(&mut self) -> Result<(), SessionError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => return Ok(()),
        };
        self.status.set_phase(SessionPhase::Processing).await;

        let salt = Uuid::new_v4().simple().to_string();
        let tab_path = self
            .write_stream(&session.event_id, &salt, "sys", &session.tab_buffer)
            .map_err(|err| SessionError::Finalize(err.to_string()));
        let mic_path = self
            .write_stream(&session.event_id, &salt, "mic", &session.mic_buffer)
            .map_err(|err| SessionError::Finalize(err.to_string()));

        let (tab_path, mic_path) = match (tab_path, mic_path) {
            (Ok(tab), Ok(mic)) => (tab, mic),
            (Err(err), _) | (_, Err(err)) => {
                self.relay.stop();
                self.status.set_error(err.to_string()).await;
                return Err(err);
            }
        };

        if tab_path.is_none() && mic_path.is_none() {
            warn!(
                "Event {} produced no audio; nothing to transcribe",
                session.event_id
            );
        } else {
            self.persist_recording(&session.event_id, &tab_path, &mic_path);

            if let Err(err) = self
                .queue
                .enqueue(
                    &session.event_id,
                    tab_path.clone(),
                    mic_path.clone(),
                    &self.model,
                )
                .await
            {
                self.relay.stop();
                self.status.set_error(err.to_string()).await;
                return Err(SessionError::Finalize(err.to_string()));
            }
        }

        self.relay.stop();
        self.status.clear().await;
        info!("Session for event {} finalized", session.event_id);

        Ok(())
    }

    fn write_stream(
        &self,
        event_id: &str,
        salt: &str,
        suffix: &str,
        chunks: &[Vec<u8>],
    ) -> std::io::Result<Option<PathBuf>> {
        if chunks.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.recordings_dir)?;
        let path = self
            .recordings_dir
            .join(format!("{event_id}-{salt}-{suffix}.webm"));

        let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        let mut blob = Vec::with_capacity(total);
        for chunk in chunks {
            blob.extend_from_slice(chunk);
        }
        std::fs::write(&path, &blob)?;

        info!("Wrote {} bytes to {:?}", total, path);
        Ok(Some(path))
    }

    fn persist_recording(
        &self,
        event_id: &str,
        tab_path: &Option<PathBuf>,
        mic_path: &Option<PathBuf>,
    ) {
        match db::open(&self.db_path) {
            Ok(conn) => {
                if let Err(err) = RecordingRepository::upsert_paths(
                    &conn,
                    event_id,
                    tab_path.as_ref().map(|p| p.to_string_lossy()).as_deref(),
                    mic_path.as_ref().map(|p| p.to_string_lossy()).as_deref(),
                ) {
                    warn!("Failed to persist recording record: {}", err);
                }
            }
            Err(err) => warn!("Failed to open recording store: {}", err),
        }
    }

    /// Abort unconditionally to idle: clear the session, stop the relay,
    /// record the error on the status handle.
    async fn abort(&mut self, message: &str) {
        warn!("Aborting session: {}", message);
        self.session = None;
        self.relay.stop();
        self.status.set_error(message.to_string()).await;
    }
}
