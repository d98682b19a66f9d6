//! WebSocket transport
//!
//! Accepts TCP connections, performs the handshake on the configured path and
//! wires each connection to the [`ConnectionMultiplexer`]:
//! - a writer task drains the connection's bounded outbound queue into the socket
//! - the reader loop hands text and binary frames to the multiplexer one at a time
//! - when the reader loop ends the connection is closed in the multiplexer,
//!   which releases every channel it held

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;

use crate::client::Client;
use crate::config::Settings;
use crate::transport::message::ServerMessage;
use crate::transport::multiplexer::ConnectionMultiplexer;

/// Bind `addr` and serve WebSocket connections until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    multiplexer: Arc<ConnectionMultiplexer>,
    settings: Settings,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{addr}{}", settings.server.ws_path);
    serve(listener, multiplexer, settings).await;
    Ok(())
}

/// Serve WebSocket connections from an already bound listener.
pub async fn serve(listener: TcpListener, multiplexer: Arc<ConnectionMultiplexer>, settings: Settings) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };

        tokio::spawn(handle_connection(
            stream,
            peer,
            multiplexer.clone(),
            settings.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    multiplexer: Arc<ConnectionMultiplexer>,
    settings: Settings,
) {
    let path = settings.server.ws_path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = match accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(settings.relay.outbound_queue_capacity);
    let client = Client::new(tx);
    let client_id = client.id.clone();

    // Forward queued messages to the socket. Ends once every sender is gone,
    // i.e. the connection entry and all its delivery callbacks were dropped.
    tokio::spawn({
        let client_id = client_id.clone();
        async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(client = %client_id, error = %e, "failed to send message");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!(client = %client_id, "send loop closed");
        }
    });

    if !multiplexer.open(client.clone()) {
        client.send(&ServerMessage::error(None, "Server is at capacity"));
        return;
    }
    debug!(client = %client_id, %peer, "connection opened");

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => multiplexer.handle_text(&client_id, text.as_str()).await,
            Ok(WsMessage::Binary(data)) => multiplexer.handle_binary(&client_id, &data).await,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(client = %client_id, error = %e, "connection error");
                break;
            }
        }
    }

    client.close();
    multiplexer.close(&client_id).await;
}
