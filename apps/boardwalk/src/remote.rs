//! Remote-control engine: host registry, claim arbitration, the host-setup
//! handshake, the consent protocol for sessions, and the frame/input relay.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::ErrorCode;
use crate::protocol::{
    FramePayload, HostIdPayload, HostSummary, InputPayload, Ownership, ServerEvent,
    SessionDecisionPayload, SessionStopPayload, SetupDecisionPayload, SetupRequestPayload,
    SetupStatus,
};
use crate::sanitize::{
    build_suggested_host_id, is_likely_private_or_local, sanitize_remote_event, sanitize_string,
    DEFAULT_MAX_STRING, HOST_ID_MAX_LEN,
};
use crate::state::{
    EngineState, HostClaim, HostEntry, PendingRequest, PendingSetup, SessionEntry,
    SetupAssignment,
};

/// Consent window for a remote-control request.
pub const PENDING_REQUEST_TTL: Duration = Duration::from_secs(45);

/// Consent window for a host-setup request.
pub const SETUP_REQUEST_TTL: Duration = Duration::from_secs(45);

/// Lifetime of a host-setup assignment awaiting its registration.
pub const SETUP_ASSIGNMENT_TTL: Duration = Duration::from_secs(15 * 60);

/// Relayed frame payload cap.
pub const MAX_FRAME_BYTES: usize = 6 * 1024 * 1024;

impl Engine {
    // ---- host registration -------------------------------------------------

    pub(crate) fn host_register(self: &Arc<Self>, connection_id: &str, payload: &HostIdPayload) {
        let host_id = sanitize_string(&payload.host_id, HOST_ID_MAX_LEN);
        if host_id.is_empty() {
            self.emit_error(connection_id, ErrorCode::HostRequired);
            return;
        }

        let mut state = self.state.lock();
        let Some(conn) = state.connections.get(connection_id) else {
            return;
        };
        let network_id = conn.network_id.clone();

        if let Some(existing) = state.hosts.get(&host_id) {
            if existing.connection_id != connection_id
                && state.connection_live(&existing.connection_id)
            {
                self.emit_error(connection_id, ErrorCode::HostIdInUse);
                return;
            }
        }

        // An agent re-registering under a new id gives up the old one.
        let previous_id = state
            .connections
            .get(connection_id)
            .and_then(|c| c.remote_host_id.clone());
        if let Some(old_id) = previous_id {
            if old_id != host_id
                && state
                    .hosts
                    .get(&old_id)
                    .is_some_and(|h| h.connection_id == connection_id)
            {
                let active = state
                    .hosts
                    .get(&old_id)
                    .map(|h| h.active_session_id.clone())
                    .unwrap_or_default();
                if !active.is_empty() {
                    self.end_session_locked(&mut state, &active, "host-disconnected");
                }
                state.hosts.remove(&old_id);
            }
        }

        state.hosts.insert(
            host_id.clone(),
            HostEntry {
                connection_id: connection_id.to_string(),
                active_session_id: String::new(),
                network_id,
            },
        );
        if let Some(conn) = state.connections.get_mut(connection_id) {
            conn.remote_host_id = Some(host_id.clone());
        }

        self.try_auto_claim(&mut state, &host_id);

        self.gateway.emit_to_connection(
            connection_id,
            ServerEvent::RemoteHostRegistered {
                host_id: host_id.clone(),
            },
        );
        self.broadcast_hosts_list_locked(&mut state);
    }

    /// Honor a live host-setup assignment: claim the host id on the target's
    /// behalf and clear the assignment. No-op when the assignment expired,
    /// the target left its room, or the host is not registered live.
    pub(crate) fn try_auto_claim(&self, state: &mut EngineState, host_id: &str) -> bool {
        let (expired, target, room_id) = match state.assignments.get(host_id) {
            None => return false,
            Some(a) => (
                a.expires_at <= Instant::now(),
                a.target_connection_id.clone(),
                a.room_id.clone(),
            ),
        };
        if expired {
            state.assignments.remove(host_id);
            return false;
        }

        let target_in_room = state
            .connections
            .get(&target)
            .is_some_and(|c| c.room_id.as_deref() == Some(room_id.as_str()));
        let host_live = state
            .hosts
            .get(host_id)
            .is_some_and(|h| state.connection_live(&h.connection_id));
        if !target_in_room || !host_live {
            return false;
        }

        state.assignments.remove(host_id);
        state.claims.insert(
            host_id.to_string(),
            HostClaim {
                connection_id: target.clone(),
                room_id: room_id.clone(),
            },
        );
        self.gateway.emit_to_connection(
            &target,
            ServerEvent::RemoteHostClaimed {
                host_id: host_id.to_string(),
                room_id,
                auto: Some(true),
            },
        );
        true
    }

    // ---- host listing ------------------------------------------------------

    pub(crate) fn hosts_request(&self, connection_id: &str) {
        let mut state = self.state.lock();
        if !state.connection_live(connection_id) {
            return;
        }
        self.gc_stale_claims(&mut state);
        let hosts = self.host_rows(&state);
        let list = self.personalized_hosts(&state, &hosts, connection_id);
        self.gateway
            .emit_to_connection(connection_id, ServerEvent::RemoteHostsList { hosts: list });
    }

    /// Broadcast the hosts list to every connection, each with its own
    /// `ownership` column. Stale claims are collected first so nobody sees a
    /// claim whose holder is gone.
    pub(crate) fn broadcast_hosts_list_locked(&self, state: &mut EngineState) {
        self.gc_stale_claims(state);
        let hosts = self.host_rows(state);
        let viewers: Vec<String> = state.connections.keys().cloned().collect();
        for viewer in viewers {
            let list = self.personalized_hosts(state, &hosts, &viewer);
            self.gateway
                .emit_to_connection(&viewer, ServerEvent::RemoteHostsList { hosts: list });
        }
    }

    fn host_rows(&self, state: &EngineState) -> Vec<(String, bool)> {
        let mut rows: Vec<(String, bool)> = state
            .hosts
            .iter()
            .map(|(id, h)| (id.clone(), !h.active_session_id.is_empty()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    fn personalized_hosts(
        &self,
        state: &EngineState,
        rows: &[(String, bool)],
        viewer: &str,
    ) -> Vec<HostSummary> {
        let viewer_room = state.room_of(viewer).map(str::to_string);
        rows.iter()
            .map(|(host_id, busy)| {
                let ownership = match state.claims.get(host_id) {
                    Some(claim) if viewer_room.as_deref() == Some(claim.room_id.as_str()) => {
                        if claim.connection_id == viewer {
                            Ownership::You
                        } else {
                            Ownership::Other
                        }
                    }
                    _ => Ownership::Unclaimed,
                };
                HostSummary {
                    host_id: host_id.clone(),
                    busy: *busy,
                    ownership,
                }
            })
            .collect()
    }

    /// Drop claims whose holder is offline or no longer in the claim's room.
    fn gc_stale_claims(&self, state: &mut EngineState) {
        let stale: Vec<String> = state
            .claims
            .iter()
            .filter(|(_, claim)| {
                !state
                    .connections
                    .get(&claim.connection_id)
                    .is_some_and(|c| c.room_id.as_deref() == Some(claim.room_id.as_str()))
            })
            .map(|(host_id, _)| host_id.clone())
            .collect();
        for host_id in stale {
            state.claims.remove(&host_id);
        }
    }

    // ---- claim arbitration -------------------------------------------------

    pub(crate) fn host_claim(&self, connection_id: &str, payload: &HostIdPayload) {
        let host_id = sanitize_string(&payload.host_id, HOST_ID_MAX_LEN);
        if host_id.is_empty() {
            self.emit_error(connection_id, ErrorCode::HostRequired);
            return;
        }

        let mut state = self.state.lock();
        let Some(room_id) = state.room_of(connection_id).map(str::to_string) else {
            self.emit_error(connection_id, ErrorCode::RoomRequired);
            return;
        };

        // An unexpired assignment reserves the claim for its target.
        let assignment_gate = state.assignments.get(&host_id).map(|a| {
            (
                a.expires_at <= Instant::now(),
                a.room_id.clone(),
                a.target_connection_id.clone(),
            )
        });
        if let Some((expired, assigned_room, assigned_target)) = assignment_gate {
            if expired {
                state.assignments.remove(&host_id);
            } else if assigned_room != room_id || assigned_target != connection_id {
                self.emit_error(connection_id, ErrorCode::HostClaimAssignedOther);
                return;
            }
        }

        let host_info = state
            .hosts
            .get(&host_id)
            .map(|h| (h.connection_id.clone(), h.network_id.clone()));
        let host_network = match host_info {
            None => {
                self.emit_error(connection_id, ErrorCode::HostOffline);
                return;
            }
            Some((host_conn, _)) if !state.connection_live(&host_conn) => {
                state.hosts.remove(&host_id);
                self.emit_error(connection_id, ErrorCode::HostOffline);
                return;
            }
            Some((_, network)) => network,
        };

        // The claimant must share a network origin with the host agent.
        let claimer_network = state
            .connections
            .get(connection_id)
            .map(|c| c.network_id.clone())
            .unwrap_or_default();
        if !claimer_network.is_empty()
            && !host_network.is_empty()
            && claimer_network != host_network
        {
            self.emit_error(connection_id, ErrorCode::HostClaimOwnerMismatch);
            return;
        }

        if let Some(claim) = state.claims.get(&host_id) {
            if claim.connection_id != connection_id {
                let holder_in_same_room = state
                    .connections
                    .get(&claim.connection_id)
                    .is_some_and(|c| c.room_id.as_deref() == Some(room_id.as_str()));
                if holder_in_same_room {
                    self.emit_error(connection_id, ErrorCode::HostClaimedByOther);
                    return;
                }
            }
        }

        state.claims.insert(
            host_id.clone(),
            HostClaim {
                connection_id: connection_id.to_string(),
                room_id: room_id.clone(),
            },
        );
        state.assignments.remove(&host_id);
        self.gateway.emit_to_connection(
            connection_id,
            ServerEvent::RemoteHostClaimed {
                host_id,
                room_id,
                auto: None,
            },
        );
        self.broadcast_hosts_list_locked(&mut state);
    }

    // ---- host-setup handshake ----------------------------------------------

    pub(crate) fn setup_request(
        self: &Arc<Self>,
        connection_id: &str,
        payload: &SetupRequestPayload,
    ) {
        let target_raw = sanitize_string(&payload.target_peer_id, DEFAULT_MAX_STRING);

        let mut state = self.state.lock();
        let Some(conn) = state.connections.get(connection_id) else {
            return;
        };
        let (Some(room_id), Some(requester_peer)) = (conn.room_id.clone(), conn.peer_id.clone())
        else {
            self.emit_error(connection_id, ErrorCode::RoomRequired);
            return;
        };
        if conn.pending_setup_request_id.is_some() {
            self.emit_error(connection_id, ErrorCode::ControllerPending);
            return;
        }

        state.prune_room(&self.gateway, &room_id);
        let Some(room) = state.rooms.get(&room_id) else {
            self.emit_error(connection_id, ErrorCode::RoomRequired);
            return;
        };

        let others: Vec<String> = room
            .participants
            .iter()
            .filter(|p| *p != &requester_peer)
            .cloned()
            .collect();
        if others.is_empty() {
            self.emit_error(connection_id, ErrorCode::ParticipantNotFound);
            return;
        }
        let target_peer = if !target_raw.is_empty() {
            if !others.contains(&target_raw) {
                self.emit_error(connection_id, ErrorCode::ParticipantNotFound);
                return;
            }
            target_raw
        } else if others.len() == 1 {
            others[0].clone()
        } else {
            self.emit_error(connection_id, ErrorCode::ParticipantRequired);
            return;
        };
        let Some(target_conn) = room.peer_to_connection.get(&target_peer).cloned() else {
            self.emit_error(connection_id, ErrorCode::ParticipantNotFound);
            return;
        };
        if target_conn == connection_id {
            self.emit_error(connection_id, ErrorCode::ParticipantInvalid);
            return;
        }

        let suggested_host_id = build_suggested_host_id(&target_peer);
        let request_id = Uuid::new_v4().to_string();
        let expires_at = Instant::now() + SETUP_REQUEST_TTL;
        state.pending_setups.insert(
            request_id.clone(),
            PendingSetup {
                requester_connection_id: connection_id.to_string(),
                requester_peer_id: requester_peer.clone(),
                target_connection_id: target_conn.clone(),
                target_peer_id: target_peer.clone(),
                room_id,
                suggested_host_id: suggested_host_id.clone(),
                expires_at,
            },
        );
        if let Some(conn) = state.connections.get_mut(connection_id) {
            conn.pending_setup_request_id = Some(request_id.clone());
        }
        if let Some(target) = state.connections.get_mut(&target_conn) {
            target.incoming_setup_request_id = Some(request_id.clone());
        }

        self.gateway.emit_to_connection(
            connection_id,
            ServerEvent::RemoteHostSetupPending {
                request_id: request_id.clone(),
                target_peer_id: target_peer,
                suggested_host_id: suggested_host_id.clone(),
            },
        );
        self.gateway.emit_to_connection(
            &target_conn,
            ServerEvent::RemoteHostSetupRequested {
                request_id: request_id.clone(),
                requester_peer_id: requester_peer,
                suggested_host_id,
            },
        );
        drop(state);

        self.schedule_setup_expiry(request_id, expires_at);
    }

    pub(crate) fn setup_decision(
        self: &Arc<Self>,
        connection_id: &str,
        payload: &SetupDecisionPayload,
    ) {
        let request_id = sanitize_string(&payload.request_id, DEFAULT_MAX_STRING);
        let accepted = payload.accepted.as_bool().unwrap_or(false);
        if request_id.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        // Only the targeted participant decides.
        let is_target = state
            .pending_setups
            .get(&request_id)
            .is_some_and(|s| s.target_connection_id == connection_id);
        if !is_target {
            return;
        }
        let Some(setup) = self.remove_pending_setup_locked(&mut state, &request_id) else {
            return;
        };

        if !accepted {
            self.gateway.emit_to_connection(
                &setup.requester_connection_id,
                ServerEvent::RemoteHostSetupResult {
                    request_id,
                    status: SetupStatus::Rejected,
                    target_peer_id: setup.target_peer_id,
                    suggested_host_id: None,
                },
            );
            return;
        }

        let expires_at = Instant::now() + SETUP_ASSIGNMENT_TTL;
        state.assignments.insert(
            setup.suggested_host_id.clone(),
            SetupAssignment {
                target_connection_id: setup.target_connection_id.clone(),
                room_id: setup.room_id.clone(),
                expires_at,
            },
        );
        // The suggested id may already be online; claim it right away.
        let auto_claimed = self.try_auto_claim(&mut state, &setup.suggested_host_id);

        self.gateway.emit_to_connection(
            &setup.requester_connection_id,
            ServerEvent::RemoteHostSetupResult {
                request_id,
                status: SetupStatus::Accepted,
                target_peer_id: setup.target_peer_id.clone(),
                suggested_host_id: Some(setup.suggested_host_id.clone()),
            },
        );
        if auto_claimed {
            self.broadcast_hosts_list_locked(&mut state);
        }
        drop(state);

        self.schedule_assignment_expiry(setup.suggested_host_id, expires_at);
    }

    // ---- session request / approval ----------------------------------------

    pub(crate) fn session_request(
        self: &Arc<Self>,
        connection_id: &str,
        payload: &HostIdPayload,
    ) {
        let host_id = sanitize_string(&payload.host_id, HOST_ID_MAX_LEN);
        if host_id.is_empty() {
            self.emit_error(connection_id, ErrorCode::HostRequired);
            return;
        }

        let mut state = self.state.lock();
        if !state.connection_live(connection_id) {
            return;
        }

        let (host_conn, host_network, host_active) = match state.hosts.get(&host_id) {
            None => {
                self.emit_error(connection_id, ErrorCode::HostNotFound);
                return;
            }
            Some(host) => (
                host.connection_id.clone(),
                host.network_id.clone(),
                host.active_session_id.clone(),
            ),
        };
        if !state.connection_live(&host_conn) {
            state.hosts.remove(&host_id);
            self.emit_error(connection_id, ErrorCode::HostOffline);
            return;
        }

        // Controlling a host on the requester's own machine or LAN is
        // blocked unless explicitly allowed.
        let requester_network = state
            .connections
            .get(connection_id)
            .map(|c| c.network_id.clone())
            .unwrap_or_default();
        if !self.config.allow_same_machine_remote
            && !requester_network.is_empty()
            && !host_network.is_empty()
            && requester_network == host_network
            && is_likely_private_or_local(&requester_network)
        {
            self.emit_error(connection_id, ErrorCode::SelfHostMachineBlocked);
            return;
        }

        if !host_active.is_empty() {
            self.emit_error(connection_id, ErrorCode::HostBusy);
            return;
        }
        if state.pending_requests.values().any(|r| r.host_id == host_id) {
            self.emit_error(connection_id, ErrorCode::HostPending);
            return;
        }
        let Some(conn) = state.connections.get(connection_id) else {
            return;
        };
        if conn.controller_session_id.is_some() {
            self.emit_error(connection_id, ErrorCode::ControllerBusy);
            return;
        }
        if conn.pending_request_id.is_some() {
            self.emit_error(connection_id, ErrorCode::ControllerPending);
            return;
        }
        let Some(room_id) = conn.room_id.clone() else {
            self.emit_error(connection_id, ErrorCode::RoomRequired);
            return;
        };
        let requester_peer = conn.peer_id.clone().unwrap_or_default();

        // The claim holder in the requester's room approves the request.
        let approver = match state.claims.get(&host_id).cloned() {
            Some(claim) => {
                let holder_in_claim_room = state
                    .connections
                    .get(&claim.connection_id)
                    .is_some_and(|c| c.room_id.as_deref() == Some(claim.room_id.as_str()));
                if !holder_in_claim_room {
                    state.claims.remove(&host_id);
                    self.emit_error(connection_id, ErrorCode::HostOwnerUnclaimed);
                    return;
                }
                if claim.room_id != room_id {
                    self.emit_error(connection_id, ErrorCode::HostOwnerUnclaimed);
                    return;
                }
                claim.connection_id
            }
            None => {
                self.emit_error(connection_id, ErrorCode::HostOwnerUnclaimed);
                return;
            }
        };
        if approver == connection_id {
            self.emit_error(connection_id, ErrorCode::SelfHostRequestBlocked);
            return;
        }

        let request_id = Uuid::new_v4().to_string();
        let expires_at = Instant::now() + PENDING_REQUEST_TTL;
        state.pending_requests.insert(
            request_id.clone(),
            PendingRequest {
                host_id: host_id.clone(),
                host_connection_id: host_conn,
                controller_connection_id: connection_id.to_string(),
                requester_peer_id: requester_peer.clone(),
                room_id,
                approver_connection_id: approver.clone(),
                expires_at,
            },
        );
        if let Some(conn) = state.connections.get_mut(connection_id) {
            conn.pending_request_id = Some(request_id.clone());
        }

        self.gateway.emit_to_connection(
            connection_id,
            ServerEvent::RemoteSessionPending {
                request_id: request_id.clone(),
                host_id: host_id.clone(),
            },
        );
        self.gateway.emit_to_connection(
            &approver,
            ServerEvent::RemoteSessionRequestedUi {
                request_id: request_id.clone(),
                host_id,
                requester_peer_id: requester_peer,
            },
        );
        drop(state);

        self.schedule_request_expiry(request_id, expires_at);
    }

    pub(crate) fn session_decision(
        &self,
        connection_id: &str,
        payload: &SessionDecisionPayload,
    ) {
        let request_id = sanitize_string(&payload.request_id, DEFAULT_MAX_STRING);
        let accepted = payload.accepted.as_bool().unwrap_or(false);
        let reason = sanitize_string(&payload.reason, DEFAULT_MAX_STRING);
        if request_id.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let authorized = state
            .pending_requests
            .get(&request_id)
            .is_some_and(|r| {
                r.approver_connection_id == connection_id
                    || r.host_connection_id == connection_id
            });
        if !authorized {
            return;
        }
        let Some(req) = self.remove_pending_request_locked(&mut state, &request_id) else {
            return;
        };

        if !accepted {
            let message = if reason.is_empty() {
                ErrorCode::RequestRejected.default_message().to_string()
            } else {
                reason
            };
            self.gateway.emit_to_connection(
                &req.controller_connection_id,
                ServerEvent::error_with_message(ErrorCode::RequestRejected, message),
            );
            return;
        }

        // The room may have shifted under the 45 s consent window;
        // re-validate everything the request asserted.
        let host_info = state
            .hosts
            .get(&req.host_id)
            .map(|h| (h.connection_id.clone(), h.active_session_id.clone()));
        match host_info {
            None => {
                self.emit_error(&req.controller_connection_id, ErrorCode::HostOffline);
                return;
            }
            Some((host_conn, _)) if host_conn != req.host_connection_id => {
                self.emit_error(&req.controller_connection_id, ErrorCode::HostOffline);
                return;
            }
            Some((host_conn, _)) if !state.connection_live(&host_conn) => {
                state.hosts.remove(&req.host_id);
                self.emit_error(&req.controller_connection_id, ErrorCode::HostOffline);
                return;
            }
            Some((_, active)) if !active.is_empty() => {
                self.emit_error(&req.controller_connection_id, ErrorCode::HostBusy);
                return;
            }
            Some(_) => {}
        }
        let Some(controller) = state.connections.get(&req.controller_connection_id) else {
            self.emit_error(&req.host_connection_id, ErrorCode::ControllerDisconnected);
            return;
        };
        if controller.controller_session_id.is_some() {
            self.emit_error(&req.host_connection_id, ErrorCode::ControllerBusy);
            return;
        }

        let session_id = Uuid::new_v4().to_string();
        state.sessions.insert(
            session_id.clone(),
            SessionEntry {
                host_id: req.host_id.clone(),
                host_connection_id: req.host_connection_id.clone(),
                controller_connection_id: req.controller_connection_id.clone(),
                frames: 0,
                frame_bytes: 0,
                inputs: 0,
            },
        );
        if let Some(host) = state.hosts.get_mut(&req.host_id) {
            host.active_session_id = session_id.clone();
        }
        if let Some(c) = state.connections.get_mut(&req.controller_connection_id) {
            c.controller_session_id = Some(session_id.clone());
        }
        if let Some(c) = state.connections.get_mut(&req.host_connection_id) {
            c.host_session_id = Some(session_id.clone());
        }

        let started = ServerEvent::RemoteSessionStarted {
            session_id,
            host_id: req.host_id.clone(),
        };
        self.gateway
            .emit_to_connection(&req.controller_connection_id, started.clone());
        self.gateway
            .emit_to_connection(&req.host_connection_id, started);
        counter!("boardwalk_sessions_started_total").increment(1);
        self.broadcast_hosts_list_locked(&mut state);
    }

    // ---- session relay -----------------------------------------------------

    pub(crate) fn host_frame(&self, connection_id: &str, payload: FramePayload) {
        let session_id = sanitize_string(&payload.session_id, DEFAULT_MAX_STRING);
        if session_id.is_empty() {
            return;
        }
        let image = match payload.image {
            Value::String(s) => s,
            _ => return,
        };
        if image.is_empty() || image.len() > MAX_FRAME_BYTES {
            return;
        }

        let mut state = self.state.lock();
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return;
        };
        if session.host_connection_id != connection_id {
            return;
        }
        session.frames += 1;
        session.frame_bytes += image.len() as u64;
        let controller = session.controller_connection_id.clone();

        let width = payload.width.as_f64().filter(|v| v.is_finite());
        let height = payload.height.as_f64().filter(|v| v.is_finite());
        let timestamp = payload
            .timestamp
            .as_f64()
            .filter(|v| v.is_finite())
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as f64);

        counter!("boardwalk_frames_relayed_total").increment(1);
        self.gateway.emit_to_connection(
            &controller,
            ServerEvent::RemoteFrame {
                session_id,
                image,
                width,
                height,
                timestamp,
            },
        );
    }

    pub(crate) fn input(&self, connection_id: &str, payload: &InputPayload) {
        let session_id = sanitize_string(&payload.session_id, DEFAULT_MAX_STRING);
        if session_id.is_empty() {
            return;
        }
        let Some(event) = sanitize_remote_event(&payload.event) else {
            return;
        };

        let mut state = self.state.lock();
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return;
        };
        if session.controller_connection_id != connection_id {
            return;
        }
        session.inputs += 1;
        let host = session.host_connection_id.clone();

        counter!("boardwalk_input_events_relayed_total").increment(1);
        self.gateway
            .emit_to_connection(&host, ServerEvent::RemoteInput { session_id, event });
    }

    // ---- session termination -----------------------------------------------

    pub(crate) fn session_stop(&self, connection_id: &str, payload: &SessionStopPayload) {
        let explicit = sanitize_string(&payload.session_id, DEFAULT_MAX_STRING);

        let mut state = self.state.lock();
        let (host_session, controller_session, pending) = match state.connections.get(connection_id)
        {
            Some(c) => (
                c.host_session_id.clone(),
                c.controller_session_id.clone(),
                c.pending_request_id.clone(),
            ),
            None => return,
        };

        let mut resolved = None;
        if !explicit.is_empty() && state.sessions.contains_key(&explicit) {
            resolved = Some(explicit);
        }
        if resolved.is_none() {
            resolved = host_session.filter(|s| state.sessions.contains_key(s));
        }
        if resolved.is_none() {
            resolved = controller_session.filter(|s| state.sessions.contains_key(s));
        }

        let Some(session_id) = resolved else {
            // No session, but stopping with a pending request as controller
            // cancels the request instead.
            if let Some(request_id) = pending {
                if let Some(req) = self.remove_pending_request_locked(&mut state, &request_id) {
                    self.gateway.emit_to_connection(
                        &req.host_connection_id,
                        ServerEvent::error(ErrorCode::RequestCancelled),
                    );
                }
            }
            return;
        };

        let ended_by = match state.sessions.get(&session_id) {
            Some(s) if s.host_connection_id == connection_id => "host",
            Some(s) if s.controller_connection_id == connection_id => "controller",
            _ => return,
        };
        self.end_session_locked(&mut state, &session_id, ended_by);
    }

    /// Canonical session teardown: drop the record, free the host, notify
    /// both endpoints, clear the connection stamps. Idempotent against an
    /// already-removed session.
    pub(crate) fn end_session_locked(
        &self,
        state: &mut EngineState,
        session_id: &str,
        ended_by: &str,
    ) {
        let Some(session) = state.sessions.remove(session_id) else {
            return;
        };
        if let Some(host) = state.hosts.get_mut(&session.host_id) {
            if host.active_session_id == session_id {
                host.active_session_id.clear();
            }
        }

        let ended = ServerEvent::RemoteSessionEnded {
            session_id: session_id.to_string(),
            host_id: session.host_id.clone(),
            ended_by: ended_by.to_string(),
        };
        self.gateway
            .emit_to_connection(&session.host_connection_id, ended.clone());
        self.gateway
            .emit_to_connection(&session.controller_connection_id, ended);

        if let Some(c) = state.connections.get_mut(&session.host_connection_id) {
            if c.host_session_id.as_deref() == Some(session_id) {
                c.host_session_id = None;
            }
        }
        if let Some(c) = state.connections.get_mut(&session.controller_connection_id) {
            if c.controller_session_id.as_deref() == Some(session_id) {
                c.controller_session_id = None;
            }
        }

        counter!("boardwalk_sessions_ended_total").increment(1);
        self.broadcast_hosts_list_locked(state);
    }

    // ---- shared cleanup ----------------------------------------------------

    /// Remove a pending request and the controller's stamp for it. The
    /// caller decides who to notify.
    pub(crate) fn remove_pending_request_locked(
        &self,
        state: &mut EngineState,
        request_id: &str,
    ) -> Option<PendingRequest> {
        let req = state.pending_requests.remove(request_id)?;
        if let Some(c) = state.connections.get_mut(&req.controller_connection_id) {
            if c.pending_request_id.as_deref() == Some(request_id) {
                c.pending_request_id = None;
            }
        }
        Some(req)
    }

    fn remove_pending_setup_locked(
        &self,
        state: &mut EngineState,
        request_id: &str,
    ) -> Option<PendingSetup> {
        let setup = state.pending_setups.remove(request_id)?;
        if let Some(c) = state.connections.get_mut(&setup.requester_connection_id) {
            if c.pending_setup_request_id.as_deref() == Some(request_id) {
                c.pending_setup_request_id = None;
            }
        }
        if let Some(c) = state.connections.get_mut(&setup.target_connection_id) {
            if c.incoming_setup_request_id.as_deref() == Some(request_id) {
                c.incoming_setup_request_id = None;
            }
        }
        Some(setup)
    }

    /// Drop claims held by a connection and assignments targeting it.
    /// Returns whether anything changed.
    pub(crate) fn clear_claims_and_assignments(
        &self,
        state: &mut EngineState,
        connection_id: &str,
    ) -> bool {
        let before = state.claims.len() + state.assignments.len();
        state
            .claims
            .retain(|_, claim| claim.connection_id != connection_id);
        state
            .assignments
            .retain(|_, a| a.target_connection_id != connection_id);
        before != state.claims.len() + state.assignments.len()
    }

    /// Withdraw setup requests the connection sent, without notification.
    pub(crate) fn cancel_outgoing_setups(&self, state: &mut EngineState, connection_id: &str) {
        let outgoing: Vec<String> = state
            .pending_setups
            .iter()
            .filter(|(_, s)| s.requester_connection_id == connection_id)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in outgoing {
            self.remove_pending_setup_locked(state, &request_id);
        }
    }

    /// Fail setup requests aimed at the connection; their requesters learn
    /// the target is gone.
    pub(crate) fn cancel_incoming_setups(&self, state: &mut EngineState, connection_id: &str) {
        let incoming: Vec<String> = state
            .pending_setups
            .iter()
            .filter(|(_, s)| s.target_connection_id == connection_id)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in incoming {
            if let Some(setup) = self.remove_pending_setup_locked(state, &request_id) {
                self.gateway.emit_to_connection(
                    &setup.requester_connection_id,
                    ServerEvent::RemoteHostSetupResult {
                        request_id,
                        status: SetupStatus::TargetDisconnected,
                        target_peer_id: setup.target_peer_id,
                        suggested_host_id: None,
                    },
                );
            }
        }
    }

    // ---- timers ------------------------------------------------------------

    fn schedule_request_expiry(self: &Arc<Self>, request_id: String, expires_at: Instant) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let mut state = engine.state.lock();
            // The record may already be decided or cancelled; only an
            // untouched, elapsed request times out.
            let due = state
                .pending_requests
                .get(&request_id)
                .is_some_and(|r| r.expires_at <= Instant::now());
            if !due {
                return;
            }
            if let Some(req) = engine.remove_pending_request_locked(&mut state, &request_id) {
                engine.gateway.emit_to_connection(
                    &req.controller_connection_id,
                    ServerEvent::error(ErrorCode::RequestTimeout),
                );
            }
        });
    }

    fn schedule_setup_expiry(self: &Arc<Self>, request_id: String, expires_at: Instant) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let mut state = engine.state.lock();
            let due = state
                .pending_setups
                .get(&request_id)
                .is_some_and(|s| s.expires_at <= Instant::now());
            if !due {
                return;
            }
            if let Some(setup) = engine.remove_pending_setup_locked(&mut state, &request_id) {
                engine.gateway.emit_to_connection(
                    &setup.requester_connection_id,
                    ServerEvent::RemoteHostSetupResult {
                        request_id,
                        status: SetupStatus::Timeout,
                        target_peer_id: setup.target_peer_id,
                        suggested_host_id: None,
                    },
                );
            }
        });
    }

    fn schedule_assignment_expiry(self: &Arc<Self>, host_id: String, expires_at: Instant) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let mut state = engine.state.lock();
            let due = state
                .assignments
                .get(&host_id)
                .is_some_and(|a| a.expires_at <= Instant::now());
            if due {
                state.assignments.remove(&host_id);
            }
        });
    }
}
