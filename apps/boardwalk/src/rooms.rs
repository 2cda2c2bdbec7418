//! Room engine: room creation, membership, and the peer↔connection
//! bijection. The pruning pass re-establishes the bijection after
//! transport-layer races; room deletion requires both the participant set
//! and the transport-level membership to be empty.

use std::sync::Arc;

use uuid::Uuid;

use crate::engine::Engine;
use crate::protocol::{JoinedRoomPayload, ServerEvent};
use crate::sanitize::{is_uuid_like, sanitize_string, DEFAULT_MAX_STRING};
use crate::state::{EngineState, Room};

impl Engine {
    /// Mint a room and join the caller at the transport level. The caller is
    /// not a participant yet; that happens when it announces a peer id via
    /// `joined-room`.
    pub(crate) fn create_room(&self, connection_id: &str) {
        let mut state = self.state.lock();
        if !state.connection_live(connection_id) {
            return;
        }

        // Creating a room while in another one implies leaving it.
        let previous = state
            .connections
            .get_mut(connection_id)
            .and_then(|c| c.room_id.take());
        if let Some(prev_room) = previous {
            if let Some(conn) = state.connections.get_mut(connection_id) {
                conn.peer_id = None;
            }
            self.remove_peer_mapping(&mut state, &prev_room, connection_id, true);
        }

        let room_id = Uuid::new_v4().to_string();
        state.rooms.insert(room_id.clone(), Room::default());
        self.gateway.join_room(&room_id, connection_id);
        if let Some(conn) = state.connections.get_mut(connection_id) {
            conn.room_id = Some(room_id.clone());
        }
        self.gateway
            .emit_to_connection(connection_id, ServerEvent::RoomCreated { room_id });
    }

    pub(crate) fn joined_room(&self, connection_id: &str, payload: &JoinedRoomPayload) {
        let room_id = sanitize_string(&payload.room_id, DEFAULT_MAX_STRING);
        if room_id.is_empty() {
            return;
        }
        let peer_id = sanitize_string(&payload.peer_id, DEFAULT_MAX_STRING);
        if peer_id.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        if !state.connection_live(connection_id) {
            return;
        }

        if !state.rooms.contains_key(&room_id) {
            if self.config.room_auto_create_on_join && is_uuid_like(&room_id) {
                state.rooms.insert(room_id.clone(), Room::default());
            } else {
                self.gateway
                    .emit_to_connection(connection_id, ServerEvent::RoomNotFound { room_id });
                return;
            }
        }

        self.gateway.join_room(&room_id, connection_id);
        state.prune_room(&self.gateway, &room_id);

        // A connection that was previously somewhere else leaves that
        // identity behind first.
        let previous = state
            .connections
            .get(connection_id)
            .map(|c| (c.room_id.clone(), c.peer_id.clone()));
        if let Some((Some(prev_room), prev_peer)) = previous {
            let rejoining_same =
                prev_room == room_id && prev_peer.as_deref() == Some(peer_id.as_str());
            if !rejoining_same {
                if prev_room != room_id {
                    self.remove_peer_mapping(&mut state, &prev_room, connection_id, true);
                } else if let Some(room) = state.rooms.get_mut(&prev_room) {
                    // Same room, new peer id: drop the old mapping but keep
                    // the transport membership.
                    if let Some(old_peer) = room.connection_to_peer.remove(connection_id) {
                        if room.peer_to_connection.get(&old_peer).map(String::as_str)
                            == Some(connection_id)
                        {
                            room.peer_to_connection.remove(&old_peer);
                        }
                        room.participants.retain(|p| p != &old_peer);
                        self.gateway.emit_to_room(
                            &prev_room,
                            &ServerEvent::UserLeft { peer_id: old_peer },
                            Some(connection_id),
                        );
                    }
                }
            }
        }

        // The peer id may still be bound to another live connection; evict
        // that binding so the room holds a single connection per peer.
        let evicted = state
            .rooms
            .get(&room_id)
            .and_then(|r| r.peer_to_connection.get(&peer_id))
            .filter(|c| c.as_str() != connection_id)
            .cloned();
        if let Some(old_conn) = evicted {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.peer_to_connection.remove(&peer_id);
                room.connection_to_peer.remove(&old_conn);
                room.participants.retain(|p| p != &peer_id);
            }
            self.gateway.emit_to_room(
                &room_id,
                &ServerEvent::UserLeft {
                    peer_id: peer_id.clone(),
                },
                None,
            );
            self.gateway.leave_room(&room_id, &old_conn);
            if let Some(old) = state.connections.get_mut(&old_conn) {
                if old.room_id.as_deref() == Some(room_id.as_str()) {
                    old.room_id = None;
                    old.peer_id = None;
                }
            }
        }

        if let Some(room) = state.rooms.get_mut(&room_id) {
            if !room.participants.iter().any(|p| p == &peer_id) {
                room.participants.push(peer_id.clone());
            }
            room.peer_to_connection
                .insert(peer_id.clone(), connection_id.to_string());
            room.connection_to_peer
                .insert(connection_id.to_string(), peer_id.clone());
        }
        if let Some(conn) = state.connections.get_mut(connection_id) {
            conn.room_id = Some(room_id.clone());
            conn.peer_id = Some(peer_id);
        }

        let participants = state
            .rooms
            .get(&room_id)
            .map(|r| r.participants.clone())
            .unwrap_or_default();
        self.gateway.emit_to_connection(
            connection_id,
            ServerEvent::GetUsers {
                room_id,
                participants,
            },
        );
    }

    /// Announce the caller to the rest of the room, once its mapping is
    /// consistent.
    pub(crate) fn ready(&self, connection_id: &str) {
        let mut state = self.state.lock();
        let Some(conn) = state.connections.get(connection_id) else {
            return;
        };
        let (Some(room_id), Some(peer_id)) = (conn.room_id.clone(), conn.peer_id.clone()) else {
            return;
        };
        state.prune_room(&self.gateway, &room_id);
        let consistent = state
            .rooms
            .get(&room_id)
            .and_then(|r| r.connection_to_peer.get(connection_id))
            .map(String::as_str)
            == Some(peer_id.as_str());
        if !consistent {
            return;
        }
        self.gateway.emit_to_room(
            &room_id,
            &ServerEvent::UserJoined { peer_id },
            Some(connection_id),
        );
    }

    /// Explicit `leave-room`: release claims and setup requests tied to the
    /// room presence, then run the leave path. The connection itself stays
    /// up.
    pub(crate) fn leave_room(self: &Arc<Self>, connection_id: &str) {
        let mut state = self.state.lock();
        if !state.connection_live(connection_id) {
            return;
        }

        let claims_changed = self.clear_claims_and_assignments(&mut state, connection_id);
        self.cancel_outgoing_setups(&mut state, connection_id);
        self.cancel_incoming_setups(&mut state, connection_id);
        if claims_changed {
            self.broadcast_hosts_list_locked(&mut state);
        }

        let room_id = state.connections.get_mut(connection_id).and_then(|c| {
            c.peer_id = None;
            c.room_id.take()
        });
        if let Some(room_id) = room_id {
            self.remove_peer_mapping(&mut state, &room_id, connection_id, true);
        }
    }

    /// Drop a connection's peer mapping from a room, notify the rest, leave
    /// at the transport level, and prune. Shared by explicit leaves, joins
    /// that move a connection, and the disconnect cascade.
    pub(crate) fn remove_peer_mapping(
        &self,
        state: &mut EngineState,
        room_id: &str,
        connection_id: &str,
        notify: bool,
    ) {
        if let Some(room) = state.rooms.get_mut(room_id) {
            if let Some(peer) = room.connection_to_peer.remove(connection_id) {
                if room.peer_to_connection.get(&peer).map(String::as_str) == Some(connection_id) {
                    room.peer_to_connection.remove(&peer);
                }
                room.participants.retain(|p| p != &peer);
                if notify {
                    self.gateway.emit_to_room(
                        room_id,
                        &ServerEvent::UserLeft { peer_id: peer },
                        Some(connection_id),
                    );
                }
            }
        }
        self.gateway.leave_room(room_id, connection_id);
        state.prune_room(&self.gateway, room_id);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::protocol::{ClientEvent, ServerEvent};
    use crate::testutil::{connect, create_room, engine, engine_with, join};

    #[tokio::test]
    async fn created_room_survives_prune_until_first_peer() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let room_id = create_room(&engine, &mut c1);
        {
            let mut state = engine.state.lock();
            state.prune_room(&engine.gateway, &room_id);
            assert!(state.rooms.contains_key(&room_id));
        }
        join(&engine, &c1, &room_id, "p1");
        let state = engine.state.lock();
        let room = state.rooms.get(&room_id).expect("room still present");
        assert_eq!(room.participants, vec!["p1".to_string()]);
        assert_eq!(
            room.peer_to_connection.get("p1"),
            Some(&c1.id),
            "forward mapping points at the joining connection"
        );
        assert_eq!(room.connection_to_peer.get(&c1.id), Some(&"p1".to_string()));
    }

    #[tokio::test]
    async fn room_is_deleted_when_the_last_connection_leaves() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let c2 = connect(&engine, "");
        let room_id = create_room(&engine, &mut c1);
        join(&engine, &c1, &room_id, "p1");
        join(&engine, &c2, &room_id, "p2");

        engine.handle_disconnect(&c1.id);
        assert!(engine.state.lock().rooms.contains_key(&room_id));

        engine.handle_disconnect(&c2.id);
        assert!(!engine.state.lock().rooms.contains_key(&room_id));
        assert_eq!(engine.gateway.room_size(&room_id), 0);
    }

    #[tokio::test]
    async fn duplicate_peer_id_evicts_the_old_connection() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let mut c2 = connect(&engine, "");
        let room_id = create_room(&engine, &mut c1);
        join(&engine, &c1, &room_id, "p");
        c1.drain();
        join(&engine, &c2, &room_id, "p");

        let evicted_saw_leave = c1
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::UserLeft { peer_id } if peer_id == "p"));
        assert!(evicted_saw_leave);

        let state = engine.state.lock();
        let room = state.rooms.get(&room_id).expect("room present");
        assert_eq!(room.peer_to_connection.get("p"), Some(&c2.id));
        assert!(!room.connection_to_peer.contains_key(&c1.id));
        assert_eq!(room.participants, vec!["p".to_string()]);
        let old = state.connections.get(&c1.id).expect("connection still live");
        assert!(old.room_id.is_none());
        assert!(old.peer_id.is_none());
        // The new connection received the participant list.
        drop(state);
        assert!(c2
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::GetUsers { participants, .. }
                if participants == &vec!["p".to_string()])));
    }

    #[tokio::test]
    async fn rejoining_the_same_identity_is_idempotent() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let room_id = create_room(&engine, &mut c1);
        join(&engine, &c1, &room_id, "p1");
        c1.drain();
        join(&engine, &c1, &room_id, "p1");

        let events = c1.drain();
        assert!(events
            .iter()
            .all(|ev| !matches!(ev, ServerEvent::UserLeft { .. })));
        let state = engine.state.lock();
        assert_eq!(
            state.rooms.get(&room_id).map(|r| r.participants.clone()),
            Some(vec!["p1".to_string()])
        );
    }

    #[tokio::test]
    async fn changing_peer_id_replaces_the_old_mapping() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let mut c2 = connect(&engine, "");
        let room_id = create_room(&engine, &mut c1);
        join(&engine, &c1, &room_id, "old");
        join(&engine, &c2, &room_id, "watcher");
        c2.drain();
        join(&engine, &c1, &room_id, "new");

        assert!(c2
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::UserLeft { peer_id } if peer_id == "old")));
        let state = engine.state.lock();
        let room = state.rooms.get(&room_id).expect("room present");
        assert!(room.peer_to_connection.get("old").is_none());
        assert_eq!(room.peer_to_connection.get("new"), Some(&c1.id));
        assert!(room.participants.iter().all(|p| p != "old"));
    }

    #[tokio::test]
    async fn joining_another_room_leaves_the_first() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let mut c2 = connect(&engine, "");
        let first = create_room(&engine, &mut c1);
        join(&engine, &c1, &first, "p1");
        let second = create_room(&engine, &mut c2);
        join(&engine, &c2, &second, "p2");

        join(&engine, &c1, &second, "p1");

        let state = engine.state.lock();
        assert!(!state.rooms.contains_key(&first), "vacated room is deleted");
        let room = state.rooms.get(&second).expect("target room present");
        assert!(room.peer_to_connection.contains_key("p1"));
        assert_eq!(
            state.connections.get(&c1.id).and_then(|c| c.room_id.clone()),
            Some(second.clone())
        );
    }

    #[tokio::test]
    async fn unknown_room_is_rejected_unless_uuid_shaped() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        join(&engine, &c1, "not-a-uuid", "p1");
        assert!(c1
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::RoomNotFound { room_id } if room_id == "not-a-uuid")));

        let uuid_room = "550e8400-e29b-41d4-a716-446655440000";
        join(&engine, &c1, uuid_room, "p1");
        assert!(c1
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::GetUsers { .. })));
    }

    #[tokio::test]
    async fn auto_create_can_be_disabled() {
        let engine = engine_with(Config {
            room_auto_create_on_join: false,
            ..Config::default()
        });
        let mut c1 = connect(&engine, "");
        let uuid_room = "550e8400-e29b-41d4-a716-446655440000";
        join(&engine, &c1, uuid_room, "p1");
        assert!(c1
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::RoomNotFound { .. })));
    }

    #[tokio::test]
    async fn ready_requires_a_consistent_mapping() {
        let engine = engine();
        let mut c1 = connect(&engine, "");
        let mut c2 = connect(&engine, "");
        let room_id = create_room(&engine, &mut c1);
        join(&engine, &c1, &room_id, "p1");
        join(&engine, &c2, &room_id, "p2");
        c1.drain();

        // A connection that never announced a peer id stays silent.
        let silent = connect(&engine, "");
        engine.handle_event(&silent.id, ClientEvent::Ready);
        assert!(c1.drain().is_empty());

        engine.handle_event(&c2.id, ClientEvent::Ready);
        assert!(c1
            .drain()
            .iter()
            .any(|ev| matches!(ev, ServerEvent::UserJoined { peer_id } if peer_id == "p2")));
    }
}
