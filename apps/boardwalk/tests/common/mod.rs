//! Shared plumbing for engine-level integration tests: a client is a
//! registered connection plus the receiving end of its event channel.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use boardwalk::config::Config;
use boardwalk::engine::Engine;
use boardwalk::protocol::{ClientEvent, HostIdPayload, JoinedRoomPayload, ServerEvent};

pub struct Client {
    pub id: String,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            events.push(ev);
        }
        events
    }
}

pub fn engine() -> Arc<Engine> {
    Engine::new(Config::default())
}

#[allow(dead_code)]
pub fn engine_with(config: Config) -> Arc<Engine> {
    Engine::new(config)
}

pub fn connect(engine: &Arc<Engine>, network_id: &str) -> Client {
    let id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    engine.register_connection(&id, network_id.to_string(), tx);
    Client { id, rx }
}

pub fn join(engine: &Arc<Engine>, client: &Client, room_id: &str, peer_id: &str) {
    engine.handle_event(
        &client.id,
        ClientEvent::JoinedRoom(JoinedRoomPayload {
            room_id: json!(room_id),
            peer_id: json!(peer_id),
        }),
    );
}

pub fn create_room(engine: &Arc<Engine>, client: &mut Client) -> String {
    engine.handle_event(&client.id, ClientEvent::CreateRoom);
    for ev in client.drain() {
        if let ServerEvent::RoomCreated { room_id } = ev {
            return room_id;
        }
    }
    panic!("room-created was not received");
}

#[allow(dead_code)]
pub fn register_host(engine: &Arc<Engine>, client: &Client, host_id: &str) {
    engine.handle_event(
        &client.id,
        ClientEvent::RemoteHostRegister(HostIdPayload {
            host_id: json!(host_id),
        }),
    );
}

#[allow(dead_code)]
pub fn claim_host(engine: &Arc<Engine>, client: &Client, host_id: &str) {
    engine.handle_event(
        &client.id,
        ClientEvent::RemoteHostClaim(HostIdPayload {
            host_id: json!(host_id),
        }),
    );
}
