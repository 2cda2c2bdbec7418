//! Socket-level round trip: a real server on an ephemeral port, two
//! tokio-tungstenite clients, admission token included.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use boardwalk::{config::Config, engine::Engine, gateway::ws_handler};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: Config) -> SocketAddr {
    let engine = Engine::new(config);
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(engine);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn send(socket: &mut Socket, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data});
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn expect_event(socket: &mut Socket, event: &str) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for an event")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["event"] == event {
                return value["data"].clone();
            }
        }
    }
}

#[tokio::test]
async fn handshake_requires_the_admission_token() {
    let addr = start_server(Config {
        remote_control_token: Some("secret".to_string()),
        ..Config::default()
    })
    .await;

    assert!(connect_async(format!("ws://{addr}/ws?token=wrong"))
        .await
        .is_err());
    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/ws?token=secret"))
        .await
        .is_ok());
}

#[tokio::test]
async fn two_party_room_over_websockets() {
    let addr = start_server(Config::default()).await;
    let (mut c1, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut c2, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    send(&mut c1, "create-room", Value::Null).await;
    let created = expect_event(&mut c1, "room-created").await;
    let room_id = created["roomId"].as_str().unwrap().to_string();

    send(&mut c2, "joined-room", json!({"roomId": room_id, "peerId": "p2"})).await;
    let users = expect_event(&mut c2, "get-users").await;
    assert_eq!(users["participants"], json!(["p2"]));

    send(&mut c1, "joined-room", json!({"roomId": room_id, "peerId": "p1"})).await;
    let users = expect_event(&mut c1, "get-users").await;
    assert_eq!(users["participants"], json!(["p2", "p1"]));

    send(&mut c1, "ready", Value::Null).await;
    let joined = expect_event(&mut c2, "user-joined").await;
    assert_eq!(joined["peerId"], "p1");

    send(&mut c2, "ping", Value::Null).await;
    expect_event(&mut c2, "pong").await;
}
