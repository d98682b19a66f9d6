//! Connection multiplexer
//!
//! Keeps one entry per live client connection with the set of channels it has
//! subscribed to, and turns client requests into relay calls. Deliveries from
//! the relay reach a connection through a callback that pushes onto that
//! connection's outbound queue.
//!
//! Requests from one connection are handled one at a time by that
//! connection's reader loop. The entry map lock is only held for bookkeeping,
//! never across a relay call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientId};
use crate::relay::payload::timestamp_now;
use crate::relay::{Callback, NotificationRelay};
use crate::transport::message::{ClientMessage, ParseError, ServerMessage};

#[derive(Debug)]
struct ConnectionEntry {
    client: Client,
    channels: HashSet<String>,
}

pub struct ConnectionMultiplexer {
    relay: Arc<NotificationRelay>,
    connections: Mutex<HashMap<ClientId, ConnectionEntry>>,
    available_channels: Vec<String>,
    max_connections: usize,
}

impl ConnectionMultiplexer {
    pub fn new(
        relay: Arc<NotificationRelay>,
        available_channels: Vec<String>,
        max_connections: usize,
    ) -> Self {
        Self {
            relay,
            connections: Mutex::new(HashMap::new()),
            available_channels,
            max_connections,
        }
    }

    pub fn relay(&self) -> &Arc<NotificationRelay> {
        &self.relay
    }

    /// Register a freshly opened connection and greet it.
    ///
    /// Returns `false` without registering when the connection limit is reached.
    pub fn open(&self, client: Client) -> bool {
        {
            let mut connections = self.connections.lock();
            if connections.len() >= self.max_connections {
                warn!(client = %client.id, limit = self.max_connections, "connection limit reached");
                return false;
            }
            connections.insert(
                client.id.clone(),
                ConnectionEntry {
                    client: client.clone(),
                    channels: HashSet::new(),
                },
            );
        }

        client.send(&ServerMessage::Connected {
            message: "Connected to notification server".into(),
            available_channels: self.available_channels.clone(),
        });
        info!(client = %client.id, "client connected");
        true
    }

    /// Parse one text frame from `client_id` and answer it.
    pub async fn handle_text(&self, client_id: &ClientId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(client_id, message).await,
            Err(err) => {
                warn!(
                    client = %client_id,
                    error = %err,
                    "invalid client message: {}",
                    text.chars().take(100).collect::<String>()
                );
                self.reply(client_id, ServerMessage::error(None, err.to_string()));
            }
        }
    }

    /// Binary frames carry the same JSON requests as text frames.
    pub async fn handle_binary(&self, client_id: &ClientId, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_text(client_id, text).await,
            Err(_) => {
                warn!(client = %client_id, bytes = data.len(), "binary frame is not UTF-8");
                self.reply(client_id, ServerMessage::error(None, ParseError::Malformed.to_string()));
            }
        }
    }

    pub async fn handle_message(&self, client_id: &ClientId, message: ClientMessage) {
        let Some(client) = self.client(client_id) else {
            debug!(client = %client_id, "message for unknown connection ignored");
            return;
        };

        let response = match message {
            ClientMessage::Subscribe { channel } => self.subscribe(&client, channel).await,
            ClientMessage::Unsubscribe { channel } => self.unsubscribe(&client, channel).await,
            ClientMessage::Publish { channel, payload } => {
                self.publish(&client, channel, payload).await
            }
            ClientMessage::List => self.list(&client),
        };
        client.send(&response);
    }

    /// Drop a connection and release every channel it held.
    pub async fn close(&self, client_id: &ClientId) {
        let entry = self.connections.lock().remove(client_id);
        let Some(entry) = entry else {
            return;
        };

        entry.client.close();
        for channel in &entry.channels {
            self.relay.unsubscribe(channel, client_id).await;
        }
        info!(client = %client_id, channels = entry.channels.len(), "client disconnected");
    }

    /// Channels `client_id` is subscribed to, sorted.
    pub fn subscribed_channels(&self, client_id: &ClientId) -> Vec<String> {
        let mut channels: Vec<String> = self
            .connections
            .lock()
            .get(client_id)
            .map(|entry| entry.channels.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn client(&self, client_id: &ClientId) -> Option<Client> {
        self.connections
            .lock()
            .get(client_id)
            .map(|entry| entry.client.clone())
    }

    fn reply(&self, client_id: &ClientId, message: ServerMessage) {
        if let Some(client) = self.client(client_id) {
            client.send(&message);
        }
    }

    fn is_subscribed(&self, client_id: &ClientId, channel: &str) -> bool {
        self.connections
            .lock()
            .get(client_id)
            .is_some_and(|entry| entry.channels.contains(channel))
    }

    async fn subscribe(&self, client: &Client, channel: String) -> ServerMessage {
        if self.is_subscribed(&client.id, &channel) {
            return ServerMessage::info(
                Some(channel.clone()),
                format!("Already subscribed to {channel}"),
            );
        }

        let callback = delivery_callback(client.clone(), channel.clone());
        if let Err(e) = self
            .relay
            .subscribe(&channel, client.id.clone(), callback)
            .await
        {
            warn!(client = %client.id, channel = %channel, error = %e, "subscribe failed");
            return ServerMessage::error(Some(channel), e.to_string());
        }

        let recorded = match self.connections.lock().get_mut(&client.id) {
            Some(entry) => {
                entry.channels.insert(channel.clone());
                true
            }
            None => false,
        };
        if !recorded {
            // The connection closed while the subscribe was in flight.
            self.relay.unsubscribe(&channel, &client.id).await;
            return ServerMessage::error(Some(channel), "Connection closed");
        }

        info!(client = %client.id, channel = %channel, "client subscribed");
        ServerMessage::Subscribed {
            message: format!("Successfully subscribed to {channel}"),
            channel,
        }
    }

    async fn unsubscribe(&self, client: &Client, channel: String) -> ServerMessage {
        if !self.is_subscribed(&client.id, &channel) {
            return ServerMessage::info(
                Some(channel.clone()),
                format!("Not subscribed to {channel}"),
            );
        }

        self.relay.unsubscribe(&channel, &client.id).await;
        if let Some(entry) = self.connections.lock().get_mut(&client.id) {
            entry.channels.remove(&channel);
        }

        info!(client = %client.id, channel = %channel, "client unsubscribed");
        ServerMessage::Unsubscribed {
            message: format!("Successfully unsubscribed from {channel}"),
            channel,
        }
    }

    async fn publish(&self, client: &Client, channel: String, payload: Value) -> ServerMessage {
        match self.relay.publish(&channel, &payload).await {
            Ok(()) => {
                debug!(client = %client.id, channel = %channel, "client published");
                ServerMessage::Published {
                    channel,
                    message: "Message published successfully".into(),
                }
            }
            Err(e) => {
                warn!(client = %client.id, channel = %channel, error = %e, "publish failed");
                ServerMessage::error(Some(channel), e.to_string())
            }
        }
    }

    fn list(&self, client: &Client) -> ServerMessage {
        let mut active = self.relay.active_channels();
        active.sort();
        ServerMessage::Channels {
            subscribed: self.subscribed_channels(&client.id),
            active,
        }
    }
}

/// Callback that forwards `channel`'s notifications to `client` while it is open.
fn delivery_callback(client: Client, channel: String) -> Callback {
    Arc::new(move |payload: &Value| {
        if !client.is_open() {
            return;
        }
        client.send(&ServerMessage::Notification {
            channel: channel.clone(),
            payload: payload.clone(),
            timestamp: timestamp_now(),
        });
    })
}
