use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::utils::RelayError;

/// Longest channel name PostgreSQL keeps (`NAMEDATALEN - 1`).
pub const MAX_NAME_LEN: usize = 63;

/// Identifies who registered a callback. The multiplexer uses the connection id.
pub type SubscriberId = String;

/// Delivery target for one subscriber on one channel.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Check that `name` is usable as a notify channel identifier.
pub fn validate_name(name: &str) -> Result<(), RelayError> {
    if name.is_empty() {
        return Err(RelayError::validation("Channel is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RelayError::validation(format!(
            "Channel name exceeds {MAX_NAME_LEN} bytes"
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(RelayError::validation(format!(
            "Invalid channel name: {name}"
        )));
    }
    Ok(())
}

/// Outcome of an in-flight upstream setup, observed by subscribers that
/// arrive while it is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SetupState {
    Pending,
    Ready,
    Failed(String),
}

/// A live upstream subscription: the listener task draining one listen
/// connection, and the signal that stops it.
pub(crate) struct Upstream {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Upstream {
    pub(crate) fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Stop the listener task and wait until it has issued UNLISTEN and
    /// dropped its connection.
    pub(crate) async fn shutdown(mut self, channel: &str) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(channel, error = %e, "listener task ended abnormally");
        }
    }
}

pub(crate) enum UpstreamState {
    Subscribing(watch::Receiver<SetupState>),
    Active(Upstream),
}

/// Distinguishes successive registry entries for the same channel name.
pub(crate) type Generation = u64;

/// Registry entry for one channel name.
pub(crate) struct Channel {
    pub(crate) generation: Generation,
    pub(crate) subscribers: HashMap<SubscriberId, Callback>,
    pub(crate) upstream: UpstreamState,
}

impl Channel {
    pub(crate) fn subscribing(generation: Generation, setup: watch::Receiver<SetupState>) -> Self {
        Self {
            generation,
            subscribers: HashMap::new(),
            upstream: UpstreamState::Subscribing(setup),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(self.upstream, UpstreamState::Active(_))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("generation", &self.generation)
            .field("subscribers", &self.subscribers.keys().collect::<Vec<_>>())
            .field("active", &self.is_active())
            .finish()
    }
}
