use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use super::{ListenStream, NotifyBackend, RawNotification};
use crate::utils::BackendError;

const CHANNEL_BUFFER: usize = 1024;

/// In-process stand-in for the database's notify mechanism.
///
/// Each channel is a `broadcast` channel; a listen stream is a receiver on it.
/// Like the real thing, nothing is buffered for listeners that arrive later.
/// The backend also keeps counters of LISTEN/UNLISTEN effects and a log of
/// every NOTIFY so the relay's bookkeeping can be checked from the outside.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    channels: HashMap<String, broadcast::Sender<RawNotification>>,
    active_listens: HashMap<String, usize>,
    listen_calls: usize,
    unlisten_calls: usize,
    published: Vec<RawNotification>,
    listen_delay: Option<Duration>,
    fail_listen: bool,
    fail_notify: bool,
    fail_recv: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `listen` call, to widen the window in which concurrent
    /// subscribers race on the same channel.
    pub fn with_listen_delay(self, delay: Duration) -> Self {
        self.state.lock().listen_delay = Some(delay);
        self
    }

    pub fn set_listen_delay(&self, delay: Option<Duration>) {
        self.state.lock().listen_delay = delay;
    }

    pub fn set_fail_listen(&self, fail: bool) {
        self.state.lock().fail_listen = fail;
    }

    /// Make every listen stream report an error instead of its next notification.
    pub fn set_fail_recv(&self, fail: bool) {
        self.state.lock().fail_recv = fail;
    }

    pub fn set_fail_notify(&self, fail: bool) {
        self.state.lock().fail_notify = fail;
    }

    /// Number of LISTEN commands issued so far.
    pub fn listen_calls(&self) -> usize {
        self.state.lock().listen_calls
    }

    /// Number of UNLISTEN commands issued so far.
    pub fn unlisten_calls(&self) -> usize {
        self.state.lock().unlisten_calls
    }

    /// Listen streams currently open on `channel`.
    pub fn active_listens(&self, channel: &str) -> usize {
        self.state
            .lock()
            .active_listens
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    /// Every notification that reached the backend, in order.
    pub fn published(&self) -> Vec<RawNotification> {
        self.state.lock().published.clone()
    }

    /// Inject a notification as if another database session had issued NOTIFY.
    pub fn inject(&self, channel: &str, payload: &str) {
        let notification = RawNotification {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        let state = self.state.lock();
        if let Some(sender) = state.channels.get(channel) {
            let _ = sender.send(notification);
        }
    }
}

#[async_trait]
impl NotifyBackend for MemoryBackend {
    async fn listen(&self, channel: &str) -> Result<Box<dyn ListenStream>, BackendError> {
        let delay = self.state.lock().listen_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_listen {
            return Err(BackendError::Unavailable(format!(
                "listen on {channel} refused"
            )));
        }

        let receiver = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER).0)
            .subscribe();
        state.listen_calls += 1;
        *state.active_listens.entry(channel.to_string()).or_insert(0) += 1;

        Ok(Box::new(MemoryListenStream {
            channel: channel.to_string(),
            receiver,
            state: self.state.clone(),
            listening: true,
        }))
    }

    async fn notify(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_notify {
            return Err(BackendError::Unavailable("publish pool exhausted".into()));
        }

        let notification = RawNotification {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        state.published.push(notification.clone());
        if let Some(sender) = state.channels.get(channel) {
            // No receivers is fine: nobody is listening right now.
            let _ = sender.send(notification);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        // A backend that refuses NOTIFY is treated as unreachable.
        if self.state.lock().fail_notify {
            return Err(BackendError::Unavailable("database unreachable".into()));
        }
        Ok(())
    }
}

struct MemoryListenStream {
    channel: String,
    receiver: broadcast::Receiver<RawNotification>,
    state: Arc<Mutex<MemoryState>>,
    listening: bool,
}

impl MemoryListenStream {
    fn release(&mut self) -> bool {
        if !self.listening {
            return false;
        }
        self.listening = false;
        let mut state = self.state.lock();
        if let Some(count) = state.active_listens.get_mut(&self.channel) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.active_listens.remove(&self.channel);
            }
        }
        true
    }
}

#[async_trait]
impl ListenStream for MemoryListenStream {
    async fn recv(&mut self) -> Result<Option<RawNotification>, BackendError> {
        loop {
            match self.receiver.recv().await {
                Ok(_) if self.state.lock().fail_recv => {
                    return Err(BackendError::Unavailable("listen connection lost".into()));
                }
                Ok(notification) => return Ok(Some(notification)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "listen stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn unlisten(&mut self) -> Result<(), BackendError> {
        if self.release() {
            self.state.lock().unlisten_calls += 1;
        }
        Ok(())
    }
}

impl Drop for MemoryListenStream {
    fn drop(&mut self) {
        // Closing the connection ends the LISTEN even without an explicit UNLISTEN.
        self.release();
    }
}
