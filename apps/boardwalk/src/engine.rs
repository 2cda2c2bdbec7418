//! Engine facade: owns the registries, dispatches inbound events to the room
//! and remote-control engines, and runs the disconnect cascade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::errors::ErrorCode;
use crate::gateway::Gateway;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::{ConnectionState, EngineState};

pub struct Engine {
    pub config: Config,
    pub gateway: Gateway,
    pub(crate) state: Mutex<EngineState>,
    arrival_seq: AtomicU64,
}

impl Engine {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway: Gateway::default(),
            state: Mutex::new(EngineState::default()),
            arrival_seq: AtomicU64::new(0),
        })
    }

    /// Attach a new connection: the gateway gets its sender, the engine gets
    /// its state record.
    pub fn register_connection(
        &self,
        connection_id: &str,
        network_id: String,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.gateway.register(connection_id, tx);
        let seq = self.arrival_seq.fetch_add(1, Ordering::Relaxed);
        self.state.lock().connections.insert(
            connection_id.to_string(),
            ConnectionState::new(connection_id.to_string(), seq, network_id),
        );
    }

    /// Route one inbound event. Events on a single connection arrive from one
    /// read loop, so they are processed to completion in order.
    pub fn handle_event(self: &Arc<Self>, connection_id: &str, event: ClientEvent) {
        match event {
            ClientEvent::CreateRoom => self.create_room(connection_id),
            ClientEvent::JoinedRoom(p) => self.joined_room(connection_id, &p),
            ClientEvent::Ready => self.ready(connection_id),
            ClientEvent::LeaveRoom => self.leave_room(connection_id),
            ClientEvent::Ping => self.gateway.emit_to_connection(connection_id, ServerEvent::Pong),
            ClientEvent::RemoteHostRegister(p) => self.host_register(connection_id, &p),
            ClientEvent::RemoteHostClaim(p) => self.host_claim(connection_id, &p),
            ClientEvent::RemoteHostsRequest => self.hosts_request(connection_id),
            ClientEvent::RemoteHostSetupRequest(p) => self.setup_request(connection_id, &p),
            ClientEvent::RemoteHostSetupDecision(p) => self.setup_decision(connection_id, &p),
            ClientEvent::RemoteSessionRequest(p) => self.session_request(connection_id, &p),
            ClientEvent::RemoteSessionDecision(p) => self.session_decision(connection_id, &p),
            ClientEvent::RemoteSessionStop(p) => self.session_stop(connection_id, &p),
            ClientEvent::RemoteHostFrame(p) => self.host_frame(connection_id, p),
            ClientEvent::RemoteInput(p) => self.input(connection_id, &p),
        }
    }

    /// Connection teardown. Runs the remote-control cascade first, then the
    /// room leave path; afterwards no registry references the departed id.
    pub fn handle_disconnect(self: &Arc<Self>, connection_id: &str) {
        let mut state = self.state.lock();
        let Some(conn) = state.connections.remove(connection_id) else {
            drop(state);
            self.gateway.unregister(connection_id);
            return;
        };

        // 1. Registered host agent: end its session, fail requests aimed at
        //    it, drop the registry entry.
        if let Some(host_id) = conn.remote_host_id.as_deref() {
            let owned = state
                .hosts
                .get(host_id)
                .is_some_and(|h| h.connection_id == connection_id);
            if owned {
                let active = state
                    .hosts
                    .get(host_id)
                    .map(|h| h.active_session_id.clone())
                    .unwrap_or_default();
                if !active.is_empty() {
                    self.end_session_locked(&mut state, &active, "host-disconnected");
                }
                let pending: Vec<String> = state
                    .pending_requests
                    .iter()
                    .filter(|(_, r)| r.host_connection_id == connection_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                for request_id in pending {
                    if let Some(req) = self.remove_pending_request_locked(&mut state, &request_id)
                    {
                        self.gateway.emit_to_connection(
                            &req.controller_connection_id,
                            ServerEvent::error(ErrorCode::HostDisconnected),
                        );
                    }
                }
                state.hosts.remove(host_id);
                self.broadcast_hosts_list_locked(&mut state);
            }
        }

        // 2. Claims held by the connection and assignments targeting it.
        let claims_changed = self.clear_claims_and_assignments(&mut state, connection_id);

        // 3. Its own pending remote-control request.
        if let Some(request_id) = conn.pending_request_id.as_deref() {
            if let Some(req) = self.remove_pending_request_locked(&mut state, request_id) {
                self.gateway.emit_to_connection(
                    &req.host_connection_id,
                    ServerEvent::error(ErrorCode::ControllerDisconnected),
                );
            }
        }

        // 4. Requests it was meant to approve.
        let approving: Vec<String> = state
            .pending_requests
            .iter()
            .filter(|(_, r)| r.approver_connection_id == connection_id)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in approving {
            if let Some(req) = self.remove_pending_request_locked(&mut state, &request_id) {
                self.gateway.emit_to_connection(
                    &req.controller_connection_id,
                    ServerEvent::error(ErrorCode::ApproverDisconnected),
                );
            }
        }

        // 5. Host-setup requests in both directions.
        self.cancel_outgoing_setups(&mut state, connection_id);
        self.cancel_incoming_setups(&mut state, connection_id);

        // 6. Controller side of an active session.
        if let Some(session_id) = conn.controller_session_id.as_deref() {
            self.end_session_locked(&mut state, session_id, "controller-disconnected");
        }

        if claims_changed {
            self.broadcast_hosts_list_locked(&mut state);
        }

        // 7. Room engine leave path.
        if let Some(room_id) = conn.room_id.as_deref() {
            self.remove_peer_mapping(&mut state, room_id, connection_id, true);
        }

        drop(state);
        self.gateway.unregister(connection_id);
    }

    pub(crate) fn emit_error(&self, connection_id: &str, code: ErrorCode) {
        self.gateway
            .emit_to_connection(connection_id, ServerEvent::error(code));
    }

    /// Periodic per-session traffic counters, enabled by `REMOTE_DEBUG=1`.
    pub fn spawn_traffic_logger(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                let mut state = engine.state.lock();
                for (session_id, session) in state.sessions.iter_mut() {
                    if session.frames == 0 && session.inputs == 0 {
                        continue;
                    }
                    info!(
                        session = %session_id,
                        host = %session.host_id,
                        frames = session.frames,
                        frame_bytes = session.frame_bytes,
                        inputs = session.inputs,
                        "session traffic"
                    );
                    session.frames = 0;
                    session.frame_bytes = 0;
                    session.inputs = 0;
                }
            }
        });
    }
}
