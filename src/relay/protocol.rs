//! Wire protocol between the browser capture page and the relay.
//!
//! Text frames carrying tagged JSON. Audio chunk payloads are base64 strings
//! inside the envelope, simpler than raw binary framing and cheap at the
//! chunk sizes MediaRecorder emits.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Messages the capture page sends to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserMessage {
    Status {
        status: CaptureStatus,
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MicChunk {
        #[serde(rename = "eventId")]
        event_id: String,
        data: String,
    },
    TabChunk {
        #[serde(rename = "eventId")]
        event_id: String,
        data: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    RecordingStarted,
    Stopped,
    Error,
}

/// Commands the host sends to the capture page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCommand {
    pub command: String,
    #[serde(rename = "eventId")]
    pub event_id: String,
}

impl HostCommand {
    pub fn stop(event_id: &str) -> Self {
        Self {
            command: "stop".to_string(),
            event_id: event_id.to_string(),
        }
    }
}

/// Decoded relay traffic, as consumed by the session controller.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Capture page confirmed both streams are live.
    Started { event_id: String },
    /// Capture page confirmed it stopped; finalization may begin.
    Stopped { event_id: String },
    /// Browser-side permission or device failure, reported verbatim.
    CaptureError { event_id: String, message: String },
    MicChunk { event_id: String, bytes: Vec<u8> },
    TabChunk { event_id: String, bytes: Vec<u8> },
    /// The socket closed without a stop handshake.
    Disconnected,
    /// A new connection replaced the previous one; partial buffers are stale.
    ConnectionReset,
}

/// Parse one inbound text frame. Malformed frames and undecodable payloads
/// are dropped with a warning; one bad frame must not kill the connection.
pub fn decode_frame(text: &str) -> Option<RelayEvent> {
    let message: BrowserMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!("Dropping malformed relay frame: {}", err);
            return None;
        }
    };

    match message {
        BrowserMessage::Status {
            status: CaptureStatus::RecordingStarted,
            event_id,
            ..
        } => Some(RelayEvent::Started { event_id }),
        BrowserMessage::Status {
            status: CaptureStatus::Stopped,
            event_id,
            ..
        } => Some(RelayEvent::Stopped { event_id }),
        BrowserMessage::Status {
            status: CaptureStatus::Error,
            event_id,
            message,
        } => Some(RelayEvent::CaptureError {
            event_id,
            message: message.unwrap_or_else(|| "capture page reported an error".to_string()),
        }),
        BrowserMessage::MicChunk { event_id, data } => {
            decode_chunk(&data).map(|bytes| RelayEvent::MicChunk { event_id, bytes })
        }
        BrowserMessage::TabChunk { event_id, data } => {
            decode_chunk(&data).map(|bytes| RelayEvent::TabChunk { event_id, bytes })
        }
    }
}

fn decode_chunk(data: &str) -> Option<Vec<u8>> {
    match BASE64.decode(data) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!("Dropping chunk with undecodable payload: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_recording_started() {
        let frame = r#"{"type":"status","status":"recording_started","eventId":"evt-1"}"#;
        match decode_frame(frame) {
            Some(RelayEvent::Started { event_id }) => assert_eq!(event_id, "evt-1"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_status_stopped() {
        let frame = r#"{"type":"status","status":"stopped","eventId":"evt-1"}"#;
        assert!(matches!(
            decode_frame(frame),
            Some(RelayEvent::Stopped { .. })
        ));
    }

    #[test]
    fn test_status_error_carries_message() {
        let frame =
            r#"{"type":"status","status":"error","eventId":"evt-1","message":"NotAllowedError"}"#;
        match decode_frame(frame) {
            Some(RelayEvent::CaptureError { message, .. }) => {
                assert_eq!(message, "NotAllowedError");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_status_error_without_message_gets_default() {
        let frame = r#"{"type":"status","status":"error","eventId":"evt-1"}"#;
        match decode_frame(frame) {
            Some(RelayEvent::CaptureError { message, .. }) => {
                assert!(!message.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_mic_chunk_decodes_base64() {
        let frame = format!(
            r#"{{"type":"mic_chunk","eventId":"evt-1","data":"{}"}}"#,
            BASE64.encode(b"opus bytes")
        );
        match decode_frame(&frame) {
            Some(RelayEvent::MicChunk { bytes, .. }) => assert_eq!(bytes, b"opus bytes"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_tab_chunk_decodes_base64() {
        let frame = format!(
            r#"{{"type":"tab_chunk","eventId":"evt-1","data":"{}"}}"#,
            BASE64.encode(b"tab audio")
        );
        match decode_frame(&frame) {
            Some(RelayEvent::TabChunk { bytes, .. }) => assert_eq!(bytes, b"tab audio"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frame_dropped() {
        assert!(decode_frame("not json").is_none());
        assert!(decode_frame(r#"{"type":"unknown"}"#).is_none());
        assert!(decode_frame(r#"{"type":"mic_chunk","eventId":"e","data":"!@#$"}"#).is_none());
    }

    #[test]
    fn test_stop_command_shape() {
        let json = serde_json::to_string(&HostCommand::stop("evt-9")).unwrap();
        assert_eq!(json, r#"{"command":"stop","eventId":"evt-9"}"#);
    }
}
