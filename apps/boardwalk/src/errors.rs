use serde::Serialize;

/// Stable error vocabulary carried on `remote-session-error` events and
/// inlined in setup results. Clients branch on the code; the message is only
/// for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    RoomRequired,
    HostRequired,
    HostNotFound,
    HostOffline,
    HostIdInUse,
    HostBusy,
    HostPending,
    ControllerBusy,
    ControllerPending,
    HostOwnerUnclaimed,
    HostClaimedByOther,
    HostClaimAssignedOther,
    HostClaimOwnerMismatch,
    SelfHostRequestBlocked,
    SelfHostMachineBlocked,
    RequestRejected,
    RequestCancelled,
    RequestTimeout,
    HostDisconnected,
    ControllerDisconnected,
    ApproverDisconnected,
    ParticipantRequired,
    ParticipantNotFound,
    ParticipantInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RoomRequired => "room-required",
            ErrorCode::HostRequired => "host-required",
            ErrorCode::HostNotFound => "host-not-found",
            ErrorCode::HostOffline => "host-offline",
            ErrorCode::HostIdInUse => "host-id-in-use",
            ErrorCode::HostBusy => "host-busy",
            ErrorCode::HostPending => "host-pending",
            ErrorCode::ControllerBusy => "controller-busy",
            ErrorCode::ControllerPending => "controller-pending",
            ErrorCode::HostOwnerUnclaimed => "host-owner-unclaimed",
            ErrorCode::HostClaimedByOther => "host-claimed-by-other",
            ErrorCode::HostClaimAssignedOther => "host-claim-assigned-other",
            ErrorCode::HostClaimOwnerMismatch => "host-claim-owner-mismatch",
            ErrorCode::SelfHostRequestBlocked => "self-host-request-blocked",
            ErrorCode::SelfHostMachineBlocked => "self-host-machine-blocked",
            ErrorCode::RequestRejected => "request-rejected",
            ErrorCode::RequestCancelled => "request-cancelled",
            ErrorCode::RequestTimeout => "request-timeout",
            ErrorCode::HostDisconnected => "host-disconnected",
            ErrorCode::ControllerDisconnected => "controller-disconnected",
            ErrorCode::ApproverDisconnected => "approver-disconnected",
            ErrorCode::ParticipantRequired => "participant-required",
            ErrorCode::ParticipantNotFound => "participant-not-found",
            ErrorCode::ParticipantInvalid => "participant-invalid",
        }
    }

    /// Default human-readable message for the code. A caller-supplied reason
    /// (rejections) overrides this.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::RoomRequired => "join a room first",
            ErrorCode::HostRequired => "host id is required",
            ErrorCode::HostNotFound => "host is not registered",
            ErrorCode::HostOffline => "host agent is offline",
            ErrorCode::HostIdInUse => "host id is registered by another agent",
            ErrorCode::HostBusy => "host is already in a session",
            ErrorCode::HostPending => "host already has a pending request",
            ErrorCode::ControllerBusy => "you already have an active session",
            ErrorCode::ControllerPending => "you already have a pending request",
            ErrorCode::HostOwnerUnclaimed => "no one in the room has claimed this host",
            ErrorCode::HostClaimedByOther => "host is claimed by another participant",
            ErrorCode::HostClaimAssignedOther => "host is assigned to another participant",
            ErrorCode::HostClaimOwnerMismatch => "host agent is on a different network",
            ErrorCode::SelfHostRequestBlocked => "cannot request control of your own host",
            ErrorCode::SelfHostMachineBlocked => "cannot control a host on this machine",
            ErrorCode::RequestRejected => "request was rejected",
            ErrorCode::RequestCancelled => "request was cancelled",
            ErrorCode::RequestTimeout => "request timed out",
            ErrorCode::HostDisconnected => "host disconnected",
            ErrorCode::ControllerDisconnected => "controller disconnected",
            ErrorCode::ApproverDisconnected => "approver disconnected",
            ErrorCode::ParticipantRequired => "a target participant is required",
            ErrorCode::ParticipantNotFound => "target participant is not in the room",
            ErrorCode::ParticipantInvalid => "target participant is invalid",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
