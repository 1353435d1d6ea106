//! Session status types and shared state handle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Phase of the recording session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    CheckingPermissions,
    RequestingPermissions,
    WaitingForCapture,
    Recording,
    Stopping,
    Processing,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingPermissions => "checking_permissions",
            Self::RequestingPermissions => "requesting_permissions",
            Self::WaitingForCapture => "waiting_for_capture",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
            Self::Processing => "processing",
        }
    }
}

/// Current session state, readable by API handlers.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub event_id: Option<String>,
    pub relay_port: Option<u16>,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            event_id: None,
            relay_port: None,
            last_error: None,
        }
    }
}

/// Thread-safe handle shared between the controller and API handlers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionStatus>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionStatus {
        self.inner.lock().await.clone()
    }

    pub async fn set_phase(&self, phase: SessionPhase) {
        let mut status = self.inner.lock().await;
        status.phase = phase;
    }

    pub async fn begin(&self, event_id: &str) {
        let mut status = self.inner.lock().await;
        status.phase = SessionPhase::CheckingPermissions;
        status.event_id = Some(event_id.to_string());
        status.relay_port = None;
        status.last_error = None;
    }

    pub async fn set_relay_port(&self, port: u16) {
        let mut status = self.inner.lock().await;
        status.relay_port = Some(port);
    }

    /// Back to idle with an error recorded.
    pub async fn set_error(&self, message: String) {
        let mut status = self.inner.lock().await;
        status.phase = SessionPhase::Idle;
        status.event_id = None;
        status.relay_port = None;
        status.last_error = Some(message);
    }

    /// Back to idle cleanly.
    pub async fn clear(&self) {
        let mut status = self.inner.lock().await;
        status.phase = SessionPhase::Idle;
        status.event_id = None;
        status.relay_port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_as_str() {
        assert_eq!(SessionPhase::Idle.as_str(), "idle");
        assert_eq!(
            SessionPhase::CheckingPermissions.as_str(),
            "checking_permissions"
        );
        assert_eq!(SessionPhase::WaitingForCapture.as_str(), "waiting_for_capture");
        assert_eq!(SessionPhase::Recording.as_str(), "recording");
        assert_eq!(SessionPhase::Stopping.as_str(), "stopping");
        assert_eq!(SessionPhase::Processing.as_str(), "processing");
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&SessionPhase::WaitingForCapture).unwrap();
        assert_eq!(json, "\"waiting_for_capture\"");

        let parsed: SessionPhase = serde_json::from_str("\"recording\"").unwrap();
        assert_eq!(parsed, SessionPhase::Recording);
    }

    #[tokio::test]
    async fn test_begin_records_event() {
        let handle = SessionStatusHandle::default();
        handle.begin("evt-1").await;

        let status = handle.get().await;
        assert_eq!(status.phase, SessionPhase::CheckingPermissions);
        assert_eq!(status.event_id, Some("evt-1".to_string()));
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_set_error_clears_session() {
        let handle = SessionStatusHandle::default();
        handle.begin("evt-1").await;
        handle.set_relay_port(8765).await;
        handle.set_error("permission denied".to_string()).await;

        let status = handle.get().await;
        assert_eq!(status.phase, SessionPhase::Idle);
        assert!(status.event_id.is_none());
        assert!(status.relay_port.is_none());
        assert_eq!(status.last_error, Some("permission denied".to_string()));
    }

    #[tokio::test]
    async fn test_begin_wipes_stale_error() {
        let handle = SessionStatusHandle::default();
        handle.set_error("old failure".to_string()).await;
        handle.begin("evt-2").await;

        assert!(handle.get().await.last_error.is_none());
    }
}
