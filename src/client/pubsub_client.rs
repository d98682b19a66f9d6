use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::transport::message::ServerMessage;

pub type ClientId = String;

/// Represents a connected WebSocket client.
///
/// Messages are pushed onto a bounded queue drained by the connection's
/// writer task. Once the connection is closed every push is a silent no-op.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for the connection, also used as its subscriber id.
    pub id: ClientId,

    sender: mpsc::Sender<WsMessage>,
    open: Arc<AtomicBool>,
}

impl Client {
    pub fn new(sender: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: format!("conn-{}", Uuid::new_v4()),
            sender,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Stop accepting further messages for this connection.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue `message` for the connection.
    ///
    /// Returns whether the message was queued. A closed connection or a full
    /// queue drops the message instead of failing the caller.
    pub fn send(&self, message: &ServerMessage) -> bool {
        if !self.is_open() {
            return false;
        }

        let text = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!(client = %self.id, error = %e, "failed to serialize message");
                return false;
            }
        };

        match self.sender.try_send(WsMessage::text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %self.id, "outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                false
            }
        }
    }
}
