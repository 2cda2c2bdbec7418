use std::net::SocketAddr;

use axum::{routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use boardwalk::{
    cli::{run_debug_client, Cli, Commands},
    config::Config,
    engine::Engine,
    gateway::ws_handler,
    http::{cors_layer, download_host_app, health_check, metrics_handler},
};

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(Commands::Debug { url, token, room }) = cli.command {
        if let Err(e) = run_debug_client(url, token, room).await {
            error!("Debug client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!("Starting Boardwalk signaling server on port {}", config.port);
    info!(
        "Room auto-create: {}, same-machine remote: {}",
        config.room_auto_create_on_join, config.allow_same_machine_remote
    );
    if config.remote_control_token.is_some() {
        info!("Admission token required on handshake");
    }

    let prometheus_handle = install_metrics_recorder();

    let engine = Engine::new(config);
    if engine.config.remote_debug {
        engine.spawn_traffic_logger();
    }

    let cors = cors_layer(&engine.config);
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/downloads/host-app-win.zip", get(download_host_app))
        .route("/ws", get(ws_handler))
        .with_state(engine.clone())
        .merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(prometheus_handle),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", engine.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("Boardwalk listening on {}", addr);
    println!("Boardwalk listening on {}", addr);

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .await
        .expect("Failed to start server");
}

fn install_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
