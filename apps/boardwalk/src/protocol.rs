//! Wire protocol: named events with JSON payloads over the WebSocket.
//!
//! Inbound events form a closed set. Payload fields that carry untrusted
//! strings stay as raw `Value`s here and are normalized by the sanitizer in
//! the engines; structural parsing failures drop the event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorCode;
use crate::sanitize::RemoteEvent;

/// Messages sent from client to server.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    CreateRoom,
    JoinedRoom(JoinedRoomPayload),
    Ready,
    LeaveRoom,
    Ping,
    RemoteHostRegister(HostIdPayload),
    RemoteHostClaim(HostIdPayload),
    RemoteHostsRequest,
    RemoteHostSetupRequest(SetupRequestPayload),
    RemoteHostSetupDecision(SetupDecisionPayload),
    RemoteSessionRequest(HostIdPayload),
    RemoteSessionDecision(SessionDecisionPayload),
    RemoteSessionStop(SessionStopPayload),
    RemoteHostFrame(FramePayload),
    RemoteInput(InputPayload),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinedRoomPayload {
    pub room_id: Value,
    pub peer_id: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostIdPayload {
    pub host_id: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupRequestPayload {
    pub target_peer_id: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupDecisionPayload {
    pub request_id: Value,
    pub accepted: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDecisionPayload {
    pub request_id: Value,
    pub accepted: Value,
    pub reason: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStopPayload {
    pub session_id: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FramePayload {
    pub session_id: Value,
    pub image: Value,
    pub width: Value,
    pub height: Value,
    pub timestamp: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputPayload {
    pub session_id: Value,
    pub event: Value,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Parse one inbound text frame. Unknown event names and malformed payloads
/// return `None`; the gateway drops those without tearing the connection
/// down.
pub fn parse_client_event(text: &str) -> Option<ClientEvent> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    // A missing or null data field means an empty payload.
    let data = match envelope.data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let event = match envelope.event.as_str() {
        "create-room" => ClientEvent::CreateRoom,
        "joined-room" => ClientEvent::JoinedRoom(from_value(data)?),
        "ready" => ClientEvent::Ready,
        "leave-room" => ClientEvent::LeaveRoom,
        "ping" => ClientEvent::Ping,
        "remote-host-register" => ClientEvent::RemoteHostRegister(from_value(data)?),
        "remote-host-claim" => ClientEvent::RemoteHostClaim(from_value(data)?),
        "remote-hosts-request" => ClientEvent::RemoteHostsRequest,
        "remote-host-setup-request" => ClientEvent::RemoteHostSetupRequest(from_value(data)?),
        "remote-host-setup-decision" => ClientEvent::RemoteHostSetupDecision(from_value(data)?),
        "remote-session-request" => ClientEvent::RemoteSessionRequest(from_value(data)?),
        // The ui-decision name is the legacy spelling of the same event.
        "remote-session-decision" | "remote-session-ui-decision" => {
            ClientEvent::RemoteSessionDecision(from_value(data)?)
        }
        "remote-session-stop" => ClientEvent::RemoteSessionStop(from_value(data)?),
        "remote-host-frame" => ClientEvent::RemoteHostFrame(from_value(data)?),
        "remote-input" => ClientEvent::RemoteInput(from_value(data)?),
        _ => return None,
    };
    Some(event)
}

fn from_value<T: serde::de::DeserializeOwned>(data: Value) -> Option<T> {
    serde_json::from_value(data).ok()
}

/// Per-viewer ownership of a host in the broadcast list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Unclaimed,
    You,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub host_id: String,
    pub busy: bool,
    pub ownership: Ownership,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    RoomCreated {
        room_id: String,
    },
    RoomNotFound {
        room_id: String,
    },
    GetUsers {
        room_id: String,
        participants: Vec<String>,
    },
    UserJoined {
        peer_id: String,
    },
    UserLeft {
        peer_id: String,
    },
    Pong,
    RemoteHostsList {
        hosts: Vec<HostSummary>,
    },
    RemoteHostRegistered {
        host_id: String,
    },
    RemoteHostClaimed {
        host_id: String,
        room_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auto: Option<bool>,
    },
    RemoteHostSetupPending {
        request_id: String,
        target_peer_id: String,
        suggested_host_id: String,
    },
    RemoteHostSetupRequested {
        request_id: String,
        requester_peer_id: String,
        suggested_host_id: String,
    },
    RemoteHostSetupResult {
        request_id: String,
        status: SetupStatus,
        target_peer_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggested_host_id: Option<String>,
    },
    RemoteSessionPending {
        request_id: String,
        host_id: String,
    },
    RemoteSessionRequestedUi {
        request_id: String,
        host_id: String,
        requester_peer_id: String,
    },
    RemoteSessionStarted {
        session_id: String,
        host_id: String,
    },
    RemoteSessionEnded {
        session_id: String,
        host_id: String,
        ended_by: String,
    },
    RemoteSessionError {
        code: ErrorCode,
        message: String,
    },
    RemoteFrame {
        session_id: String,
        image: String,
        width: Option<f64>,
        height: Option<f64>,
        timestamp: f64,
    },
    RemoteInput {
        session_id: String,
        event: RemoteEvent,
    },
}

/// Outcome of a host-setup request, inlined in `remote-host-setup-result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupStatus {
    Accepted,
    Rejected,
    Timeout,
    TargetDisconnected,
}

impl ServerEvent {
    pub fn error(code: ErrorCode) -> Self {
        ServerEvent::RemoteSessionError {
            code,
            message: code.default_message().to_string(),
        }
    }

    pub fn error_with_message(code: ErrorCode, message: String) -> Self {
        ServerEvent::RemoteSessionError { code, message }
    }
}
