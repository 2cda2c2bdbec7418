use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "boardwalk")]
#[command(about = "Boardwalk signaling server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the listening port from the environment
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running server and print its host list
    Debug {
        /// Server WebSocket URL
        #[arg(short, long, default_value = "ws://localhost:5000/ws")]
        url: String,

        /// Admission token, if the server requires one
        #[arg(short, long)]
        token: Option<String>,

        /// Room to join before listing hosts
        #[arg(short, long)]
        room: Option<String>,
    },
}

pub async fn run_debug_client(
    url: String,
    token: Option<String>,
    room: Option<String>,
) -> Result<()> {
    let url = match token {
        Some(t) => format!("{url}?token={t}"),
        None => url,
    };
    let (socket, _) = connect_async(&url).await?;
    let (mut write, mut read) = socket.split();

    if let Some(room_id) = room {
        let peer_id = format!("debug-{}", Uuid::new_v4().simple());
        let join = json!({
            "event": "joined-room",
            "data": {"roomId": room_id, "peerId": peer_id},
        });
        write.send(Message::Text(join.to_string())).await?;
    }
    write
        .send(Message::Text(
            json!({"event": "remote-hosts-request"}).to_string(),
        ))
        .await?;

    loop {
        let frame = timeout(Duration::from_secs(5), read.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for the hosts list"))?;
        let Some(frame) = frame else {
            bail!("server closed the connection");
        };
        if let Message::Text(text) = frame? {
            let value: Value = serde_json::from_str(&text)?;
            if value["event"] == "remote-hosts-list" {
                println!("{}", serde_json::to_string_pretty(&value["data"])?);
                return Ok(());
            }
        }
    }
}
