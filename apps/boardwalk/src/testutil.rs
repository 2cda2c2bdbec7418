//! In-process clients for engine unit tests: a connection is just a channel.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::Engine;
use crate::protocol::{ClientEvent, JoinedRoomPayload, ServerEvent};

pub(crate) struct TestClient {
    pub id: String,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl TestClient {
    /// Everything received so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            events.push(ev);
        }
        events
    }
}

pub(crate) fn engine() -> Arc<Engine> {
    Engine::new(Config::default())
}

pub(crate) fn engine_with(config: Config) -> Arc<Engine> {
    Engine::new(config)
}

pub(crate) fn connect(engine: &Arc<Engine>, network_id: &str) -> TestClient {
    let id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    engine.register_connection(&id, network_id.to_string(), tx);
    TestClient { id, rx }
}

pub(crate) fn join(engine: &Arc<Engine>, client: &TestClient, room_id: &str, peer_id: &str) {
    engine.handle_event(
        &client.id,
        ClientEvent::JoinedRoom(JoinedRoomPayload {
            room_id: json!(room_id),
            peer_id: json!(peer_id),
        }),
    );
}

pub(crate) fn create_room(engine: &Arc<Engine>, client: &mut TestClient) -> String {
    engine.handle_event(&client.id, ClientEvent::CreateRoom);
    for ev in client.drain() {
        if let ServerEvent::RoomCreated { room_id } = ev {
            return room_id;
        }
    }
    panic!("room-created was not received");
}
