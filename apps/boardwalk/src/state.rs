//! Owned registries for rooms, hosts, and sessions, plus per-connection
//! attached state. All of this lives behind the engine's single lock; no
//! interior record ever leaves this module by reference.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::gateway::Gateway;

/// Per-connection scratch state attached by the engines. The connection's
/// lifetime is bounded by the transport; an entry here means the connection
/// is live.
#[derive(Debug)]
pub struct ConnectionState {
    pub id: String,
    /// Monotonic arrival order.
    pub seq: u64,
    /// Normalized remote origin (forwarded-for or peer address; loopback
    /// collapses to `loopback-local`).
    pub network_id: String,
    pub room_id: Option<String>,
    pub peer_id: Option<String>,
    pub remote_host_id: Option<String>,
    pub controller_session_id: Option<String>,
    pub host_session_id: Option<String>,
    pub pending_request_id: Option<String>,
    pub pending_setup_request_id: Option<String>,
    pub incoming_setup_request_id: Option<String>,
}

impl ConnectionState {
    pub fn new(id: String, seq: u64, network_id: String) -> Self {
        Self {
            id,
            seq,
            network_id,
            room_id: None,
            peer_id: None,
            remote_host_id: None,
            controller_session_id: None,
            host_session_id: None,
            pending_request_id: None,
            pending_setup_request_id: None,
            incoming_setup_request_id: None,
        }
    }
}

/// A meeting room. `participants` keeps join order; the two maps are kept as
/// strict inverses of each other by the pruning pass.
#[derive(Debug, Default)]
pub struct Room {
    pub participants: Vec<String>,
    pub peer_to_connection: HashMap<String, String>,
    pub connection_to_peer: HashMap<String, String>,
}

/// A registered host agent. `active_session_id` is empty while idle.
#[derive(Debug)]
pub struct HostEntry {
    pub connection_id: String,
    pub active_session_id: String,
    pub network_id: String,
}

/// In-room approver for session requests targeting a host id.
#[derive(Debug, Clone)]
pub struct HostClaim {
    pub connection_id: String,
    pub room_id: String,
}

/// Pre-authorized claim: the next registration of the host id auto-claims
/// for `target_connection_id` while it is still in `room_id`.
#[derive(Debug)]
pub struct SetupAssignment {
    pub target_connection_id: String,
    pub room_id: String,
    pub expires_at: Instant,
}

/// A remote-control request awaiting the approver's decision.
#[derive(Debug)]
pub struct PendingRequest {
    pub host_id: String,
    pub host_connection_id: String,
    pub controller_connection_id: String,
    pub requester_peer_id: String,
    pub room_id: String,
    pub approver_connection_id: String,
    pub expires_at: Instant,
}

/// A host-setup request awaiting the target participant's decision.
#[derive(Debug)]
pub struct PendingSetup {
    pub requester_connection_id: String,
    pub requester_peer_id: String,
    pub target_connection_id: String,
    pub target_peer_id: String,
    pub room_id: String,
    pub suggested_host_id: String,
    pub expires_at: Instant,
}

/// An active, exclusive host↔controller binding. The counters feed the
/// optional traffic logger.
#[derive(Debug)]
pub struct SessionEntry {
    pub host_id: String,
    pub host_connection_id: String,
    pub controller_connection_id: String,
    pub frames: u64,
    pub frame_bytes: u64,
    pub inputs: u64,
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub connections: HashMap<String, ConnectionState>,
    pub rooms: HashMap<String, Room>,
    pub hosts: HashMap<String, HostEntry>,
    pub claims: HashMap<String, HostClaim>,
    pub assignments: HashMap<String, SetupAssignment>,
    pub pending_requests: HashMap<String, PendingRequest>,
    pub pending_setups: HashMap<String, PendingSetup>,
    pub sessions: HashMap<String, SessionEntry>,
}

impl EngineState {
    pub fn connection_live(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Current room of a live connection, if any.
    pub fn room_of(&self, connection_id: &str) -> Option<&str> {
        self.connections
            .get(connection_id)
            .and_then(|c| c.room_id.as_deref())
    }

    /// Re-establish the peer↔connection bijection for one room and delete
    /// the room when both the participant set and the transport-level
    /// membership are empty. The conjunction keeps a just-created room alive
    /// until its creator announces a peer id.
    pub fn prune_room(&mut self, gateway: &Gateway, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let connections = &self.connections;

        let stale_peers: Vec<String> = room
            .peer_to_connection
            .iter()
            .filter(|(peer, conn)| {
                !connections.contains_key(*conn)
                    || room.connection_to_peer.get(*conn) != Some(*peer)
            })
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in stale_peers {
            room.peer_to_connection.remove(&peer);
        }

        let stale_conns: Vec<String> = room
            .connection_to_peer
            .iter()
            .filter(|(conn, peer)| room.peer_to_connection.get(*peer) != Some(*conn))
            .map(|(conn, _)| conn.clone())
            .collect();
        for conn in stale_conns {
            room.connection_to_peer.remove(&conn);
        }

        let live_peers: std::collections::HashSet<String> =
            room.peer_to_connection.keys().cloned().collect();
        let mut seen = std::collections::HashSet::new();
        room.participants
            .retain(|p| live_peers.contains(p) && seen.insert(p.clone()));

        if room.participants.is_empty() && gateway.room_size(room_id) == 0 {
            self.rooms.remove(room_id);
        }
    }
}
