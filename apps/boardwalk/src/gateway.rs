//! Transport gateway: WebSocket upgrade, admission check, per-connection
//! send channels, and the fanout primitives the engines emit through.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::protocol::{self, ServerEvent};

/// Per-connection payload cap, enforced at the socket before dispatch.
pub const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Connection senders and transport-level room membership. Membership
/// mutations are synchronous, so a join is observable the moment it returns.
#[derive(Default)]
pub struct Gateway {
    connections: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
    rooms: DashMap<String, HashSet<String>>,
}

impl Gateway {
    pub fn register(&self, connection_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(connection_id.to_string(), tx);
    }

    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    pub fn join_room(&self, room_id: &str, connection_id: &str) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    pub fn leave_room(&self, room_id: &str, connection_id: &str) {
        let mut drop_room = false;
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(connection_id);
            drop_room = members.is_empty();
        }
        if drop_room {
            self.rooms.remove(room_id);
        }
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn connections_in_room(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn emit_to_connection(&self, connection_id: &str, event: ServerEvent) {
        if let Some(tx) = self.connections.get(connection_id) {
            let _ = tx.send(event);
        }
    }

    pub fn emit_to_room(&self, room_id: &str, event: &ServerEvent, except: Option<&str>) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        for member in members.iter() {
            if Some(member.as_str()) == except {
                continue;
            }
            if let Some(tx) = self.connections.get(member.as_str()) {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub fn broadcast(&self, event: &ServerEvent) {
        for entry in self.connections.iter() {
            let _ = entry.value().send(event.clone());
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler. The admission token is checked before the
/// upgrade completes; a mismatch refuses the handshake with `unauthorized`.
pub async fn ws_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(engine): State<Arc<Engine>>,
) -> Response {
    if let Some(expected) = engine.config.remote_control_token.as_deref() {
        let presented = query.token.as_deref().unwrap_or("").trim();
        if presented != expected {
            warn!(%remote_addr, "handshake refused: bad admission token");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let network_id = derive_network_id(&headers, remote_addr);
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, engine, network_id))
}

async fn handle_socket(socket: WebSocket, engine: Arc<Engine>, network_id: String) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let writer_conn = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(connection = %writer_conn, %err, "failed to encode event"),
            }
        }
    });

    engine.register_connection(&connection_id, network_id, tx);
    counter!("boardwalk_connections_total").increment(1);
    debug!(connection = %connection_id, "connected");

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match protocol::parse_client_event(&text) {
                Some(event) => engine.handle_event(&connection_id, event),
                None => debug!(connection = %connection_id, "dropped unparseable event"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(connection = %connection_id, %err, "socket error");
                break;
            }
        }
    }

    engine.handle_disconnect(&connection_id);
    writer.abort();
    debug!(connection = %connection_id, "disconnected");
}

/// Remote network identity: first forwarded-for entry if present, else the
/// peer address. All loopback origins collapse to one id so local agents and
/// local browsers compare equal.
pub fn derive_network_id(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let raw = forwarded.unwrap_or_else(|| remote_addr.ip().to_string());
    normalize_network_id(&raw)
}

pub fn normalize_network_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let stripped = trimmed.strip_prefix("::ffff:").unwrap_or(trimmed);
    if stripped == "localhost" {
        return "loopback-local".to_string();
    }
    if let Ok(ip) = stripped.parse::<IpAddr>() {
        if ip.is_loopback() {
            return "loopback-local".to_string();
        }
    }
    stripped.to_string()
}
