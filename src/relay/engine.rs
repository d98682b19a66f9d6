//! Relay engine
//!
//! `NotificationRelay` keeps one upstream subscription per channel and fans
//! its notifications out to the callbacks registered in the
//! [`ChannelRegistry`].
//!
//! Concurrency notes:
//! - The registry lock is never held across an `.await`. Upstream setup and
//!   teardown happen between short registry calls.
//! - The first subscriber of an unknown channel performs the setup on a
//!   spawned task; subscribers arriving meanwhile wait on a `watch` of the
//!   outcome instead of issuing a second LISTEN.
//! - Each active channel has exactly one listener task, so notifications on a
//!   channel reach every subscriber in upstream order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::channel::{Callback, Generation, SetupState, SubscriberId, Upstream, validate_name};
use super::payload;
use super::registry::{ChannelRegistry, Join};
use crate::database::{ListenStream, NotifyBackend};
use crate::utils::{BackendError, RelayError};

/// Pause before polling a listen stream again after it reported an error.
const RECV_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct NotificationRelay {
    backend: Arc<dyn NotifyBackend>,
    registry: Arc<ChannelRegistry>,
}

impl NotificationRelay {
    pub fn new(backend: Arc<dyn NotifyBackend>) -> Self {
        Self {
            backend,
            registry: Arc::new(ChannelRegistry::new()),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Register `callback` for `channel` under `subscriber`.
    ///
    /// The first subscriber of a channel establishes the upstream LISTEN. If
    /// that fails the error is returned and no trace of the channel remains.
    /// Subscribing again with the same `subscriber` replaces the callback.
    pub async fn subscribe(
        &self,
        channel: &str,
        subscriber: SubscriberId,
        callback: Callback,
    ) -> Result<(), RelayError> {
        validate_name(channel)?;

        loop {
            match self.registry.join(channel, &subscriber, &callback) {
                Join::Registered => {
                    debug!(channel, %subscriber, "joined active channel");
                    return Ok(());
                }
                Join::Wait(mut setup) => {
                    let outcome = setup
                        .wait_for(|state| *state != SetupState::Pending)
                        .await
                        .map(|state| (*state).clone());
                    match outcome {
                        Ok(SetupState::Failed(reason)) => {
                            return Err(RelayError::Subscription {
                                channel: channel.to_string(),
                                reason,
                            });
                        }
                        Err(_) => {
                            return Err(RelayError::Subscription {
                                channel: channel.to_string(),
                                reason: "upstream setup was interrupted".into(),
                            });
                        }
                        // Ready: retry the join against the now active channel.
                        Ok(_) => continue,
                    }
                }
                Join::Setup { setup, generation } => {
                    let task = tokio::spawn(establish(
                        self.backend.clone(),
                        self.registry.clone(),
                        channel.to_string(),
                        generation,
                        subscriber.clone(),
                        callback.clone(),
                        setup,
                    ));
                    return task.await.unwrap_or_else(|e| {
                        Err(RelayError::Subscription {
                            channel: channel.to_string(),
                            reason: e.to_string(),
                        })
                    });
                }
            }
        }
    }

    /// Remove `subscriber` from `channel`, tearing the upstream down when it
    /// was the last one. Unknown channels and subscribers are ignored.
    pub async fn unsubscribe(&self, channel: &str, subscriber: &SubscriberId) {
        if let Some(upstream) = self.registry.leave(channel, subscriber) {
            upstream.shutdown(channel).await;
            info!(channel, "unsubscribed from channel");
        }
    }

    /// Send `payload` to `channel` through the backend's shared pool.
    ///
    /// Does not require any subscription; with nobody listening the
    /// notification still reaches the database.
    pub async fn publish(&self, channel: &str, payload: &Value) -> Result<(), RelayError> {
        validate_name(channel)?;

        let text = payload::encode(payload).map_err(|e| RelayError::Publish {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        self.backend
            .notify(channel, &text)
            .await
            .map_err(|e| RelayError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        debug!(channel, bytes = text.len(), "published notification");
        Ok(())
    }

    pub fn active_channels(&self) -> Vec<String> {
        self.registry.active_channels()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.registry.subscriber_count(channel)
    }

    pub async fn health_check(&self) -> Result<(), BackendError> {
        self.backend.ping().await
    }

    /// Tear down every upstream subscription.
    pub async fn close_all(&self) {
        let upstreams = self.registry.drain();
        let count = upstreams.len();
        join_all(
            upstreams
                .into_iter()
                .map(|(channel, upstream)| async move { upstream.shutdown(&channel).await }),
        )
        .await;
        info!(channels = count, "closed all upstream subscriptions");
    }
}

/// Open the upstream for `channel` and publish the outcome to waiting subscribers.
async fn establish(
    backend: Arc<dyn NotifyBackend>,
    registry: Arc<ChannelRegistry>,
    channel: String,
    generation: Generation,
    subscriber: SubscriberId,
    callback: Callback,
    setup: watch::Sender<SetupState>,
) -> Result<(), RelayError> {
    let stream = match backend.listen(&channel).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(channel = %channel, error = %e, "failed to subscribe to channel");
            registry.abandon(&channel, generation);
            let _ = setup.send(SetupState::Failed(e.to_string()));
            return Err(RelayError::Subscription {
                channel,
                reason: e.to_string(),
            });
        }
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run_listener(
        channel.clone(),
        generation,
        stream,
        registry.clone(),
        shutdown_rx,
    ));
    let upstream = Upstream::new(shutdown_tx, task);

    if let Err(upstream) = registry.activate(&channel, generation, upstream, subscriber, callback) {
        upstream.shutdown(&channel).await;
        let reason = "relay closed during subscribe".to_string();
        let _ = setup.send(SetupState::Failed(reason.clone()));
        return Err(RelayError::Subscription { channel, reason });
    }

    let _ = setup.send(SetupState::Ready);
    info!(channel = %channel, "subscribed to channel");
    Ok(())
}

/// Drain one listen stream into the registry until told to stop.
///
/// A pending shutdown always wins over a ready notification.
async fn run_listener(
    channel: String,
    generation: Generation,
    mut stream: Box<dyn ListenStream>,
    registry: Arc<ChannelRegistry>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut open = true;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = stream.recv(), if open => match next {
                Ok(Some(notification)) => {
                    registry.deliver(&channel, generation, &notification.payload)
                }
                Ok(None) => {
                    warn!(channel = %channel, "listen stream ended");
                    open = false;
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "listen stream error");
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(RECV_RETRY_DELAY) => {}
                    }
                }
            },
        }
    }

    if let Err(e) = stream.unlisten().await {
        warn!(channel = %channel, error = %e, "error closing listener");
    }
}
