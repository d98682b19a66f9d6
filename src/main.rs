//! CLI for pgrelay
//!
//! Subcommands:
//! - `server`: run the HTTP API and the WebSocket server
//! - `client`: run a simple client that subscribes and publishes (useful for smoke tests)

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pgrelay::config::load_config;
use pgrelay::database::{MemoryBackend, NotifyBackend, PostgresBackend};
use pgrelay::http::{AppState, start_http_server};
use pgrelay::relay::NotificationRelay;
use pgrelay::transport::{ConnectionMultiplexer, start_websocket_server};
use pgrelay::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pgrelay")]
enum Command {
    /// Start the HTTP API and WebSocket server
    Server {
        /// Use an in-process notify backend instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },
    /// Run the example client (connects, subscribes, publishes, prints what arrives)
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:3001/ws")]
        url: String,
        /// Channel to subscribe and publish to
        #[arg(long, default_value = "chat")]
        channel: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cmd = Command::parse();

    match cmd {
        Command::Server { memory } => {
            if let Err(e) = run_server(memory).await {
                // No-op when the server already installed its subscriber.
                logging::init("info");
                error!("Server failed: {e:#}");
                std::process::exit(1);
            }
        }
        Command::Client { url, channel } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &channel).await {
                error!("Client failed: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(memory: bool) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    logging::init(&config.log.level);

    let backend: Arc<dyn NotifyBackend> = if memory {
        info!("Using in-memory notify backend");
        Arc::new(MemoryBackend::new())
    } else {
        let backend = PostgresBackend::connect(&config.database)
            .await
            .context("failed to connect to PostgreSQL")?;
        info!(
            host = %config.database.host,
            database = %config.database.name,
            "Connected to PostgreSQL"
        );
        Arc::new(backend)
    };

    let relay = Arc::new(NotificationRelay::new(backend));
    let multiplexer = Arc::new(ConnectionMultiplexer::new(
        relay.clone(),
        config.relay.available_channels.clone(),
        config.server.max_connections,
    ));

    let http_addr = format!("{}:{}", config.server.host, config.server.port);
    let ws_addr = format!("{}:{}", config.server.host, config.server.ws_port);
    let state = AppState {
        relay: relay.clone(),
        ws_port: config.server.ws_port,
        ws_path: config.server.ws_path.clone(),
    };

    tokio::select! {
        res = start_http_server(&http_addr, state) => {
            res.context("HTTP server failed")?;
            error!("HTTP server exited unexpectedly.");
        }
        res = start_websocket_server(&ws_addr, multiplexer, config.clone()) => {
            res.context("WebSocket server failed")?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    relay.close_all().await;
    Ok(())
}

async fn run_client(url: &str, channel: &str) -> anyhow::Result<()> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    // 1. Greeting
    if let Some(Ok(WsMessage::Text(msg))) = ws_stream.next().await {
        println!("Greeting: {msg}");
    }

    // 2. Subscribe
    let subscribe = json!({ "type": "subscribe", "channel": channel });
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;
    if let Some(Ok(WsMessage::Text(msg))) = ws_stream.next().await {
        println!("Subscribe response: {msg}");
    }

    // 3. Publish
    let publish = json!({
        "type": "publish",
        "channel": channel,
        "payload": { "user": "pgrelay-client", "message": "Hello from the example client" }
    });
    ws_stream
        .send(WsMessage::Text(publish.to_string().into()))
        .await?;

    // Publish ack and the notification itself, in either order.
    for _ in 0..2 {
        match ws_stream.next().await {
            Some(Ok(WsMessage::Text(incoming))) => println!("Incoming: {incoming}"),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
