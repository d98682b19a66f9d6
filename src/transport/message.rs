use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::relay::channel::validate_name;

/// A request from a WebSocket client, after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish { channel: String, payload: Value },
    List,
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("{0}")]
    Invalid(String),
}

/// The request shape as it appears on the wire.
#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let raw: RawRequest = serde_json::from_str(text).map_err(|_| ParseError::Malformed)?;

        match raw.kind.as_str() {
            "subscribe" => Ok(ClientMessage::Subscribe {
                channel: required_channel(raw.channel)?,
            }),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                channel: required_channel(raw.channel)?,
            }),
            "publish" => Ok(ClientMessage::Publish {
                channel: required_channel(raw.channel)?,
                payload: raw.payload.unwrap_or_else(|| Value::Object(Map::new())),
            }),
            "list" => Ok(ClientMessage::List),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

fn required_channel(channel: Option<String>) -> Result<String, ParseError> {
    let channel = channel.ok_or_else(|| ParseError::Invalid("Channel is required".into()))?;
    validate_name(&channel).map_err(|e| ParseError::Invalid(e.to_string()))?;
    Ok(channel)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        message: String,
        #[serde(rename = "availableChannels")]
        available_channels: Vec<String>,
    },
    #[serde(rename = "subscribed")]
    Subscribed { channel: String, message: String },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { channel: String, message: String },
    #[serde(rename = "info")]
    Info {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        message: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        message: String,
    },
    #[serde(rename = "notification")]
    Notification {
        channel: String,
        payload: Value,
        timestamp: String,
    },
    #[serde(rename = "channels")]
    Channels {
        subscribed: Vec<String>,
        active: Vec<String>,
    },
    #[serde(rename = "published")]
    Published { channel: String, message: String },
}

impl ServerMessage {
    pub fn error(channel: Option<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            channel,
            message: message.into(),
        }
    }

    pub fn info(channel: Option<String>, message: impl Into<String>) -> Self {
        ServerMessage::Info {
            channel,
            message: message.into(),
        }
    }
}
