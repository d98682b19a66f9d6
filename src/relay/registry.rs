use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{trace, warn};

use super::channel::{
    Callback, Channel, Generation, SetupState, SubscriberId, Upstream, UpstreamState,
};
use super::payload;

/// What a subscriber has to do after asking to join a channel.
pub(crate) enum Join {
    /// The channel was active and the callback is now registered.
    Registered,
    /// Someone else is establishing the upstream; wait for the outcome and retry.
    Wait(watch::Receiver<SetupState>),
    /// The channel was unknown. The caller owns the setup of entry
    /// `generation` and must finish it with [`ChannelRegistry::activate`] or
    /// [`ChannelRegistry::abandon`].
    Setup {
        setup: watch::Sender<SetupState>,
        generation: Generation,
    },
}

/// Per-channel subscriber sets and upstream handles.
///
/// Every method takes the lock for a short, synchronous critical section.
/// Nothing here awaits; network work happens in the relay around these calls.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Channel>>,
    next_generation: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn join(&self, channel: &str, subscriber: &SubscriberId, callback: &Callback) -> Join {
        let mut channels = self.channels.lock();
        match channels.entry(channel.to_string()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                match &entry.upstream {
                    UpstreamState::Active(_) => {
                        entry.subscribers.insert(subscriber.clone(), callback.clone());
                        Join::Registered
                    }
                    UpstreamState::Subscribing(setup) => Join::Wait(setup.clone()),
                }
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (setup, rx) = watch::channel(SetupState::Pending);
                entry.insert(Channel::subscribing(generation, rx));
                Join::Setup { setup, generation }
            }
        }
    }

    /// Mark a channel's upstream as live and register the subscriber that set it up.
    ///
    /// Returns the upstream back if the entry for `generation` vanished in the
    /// meantime (the registry was drained); the caller must then shut it down.
    pub(crate) fn activate(
        &self,
        channel: &str,
        generation: Generation,
        upstream: Upstream,
        subscriber: SubscriberId,
        callback: Callback,
    ) -> Result<(), Upstream> {
        let mut channels = self.channels.lock();
        match channels.get_mut(channel) {
            Some(entry) if entry.generation == generation && !entry.is_active() => {
                entry.upstream = UpstreamState::Active(upstream);
                entry.subscribers.insert(subscriber, callback);
                Ok(())
            }
            _ => Err(upstream),
        }
    }

    /// Drop a channel whose upstream setup failed.
    pub(crate) fn abandon(&self, channel: &str, generation: Generation) {
        let mut channels = self.channels.lock();
        if channels
            .get(channel)
            .is_some_and(|c| c.generation == generation && !c.is_active())
        {
            channels.remove(channel);
        }
    }

    /// Remove a subscriber. When it was the last one, the channel entry is
    /// removed and its upstream handed back for teardown.
    pub(crate) fn leave(&self, channel: &str, subscriber: &SubscriberId) -> Option<Upstream> {
        let mut channels = self.channels.lock();
        let entry = channels.get_mut(channel)?;
        entry.subscribers.remove(subscriber)?;
        if !entry.subscribers.is_empty() || !entry.is_active() {
            return None;
        }
        match channels.remove(channel)?.upstream {
            UpstreamState::Active(upstream) => Some(upstream),
            UpstreamState::Subscribing(_) => None,
        }
    }

    /// Remove every channel and hand back the upstreams of the active ones.
    ///
    /// Channels still being set up are dropped too, so their pending
    /// [`ChannelRegistry::activate`] fails and the new upstream is shut down.
    pub(crate) fn drain(&self) -> Vec<(String, Upstream)> {
        self.channels
            .lock()
            .drain()
            .filter_map(|(name, channel)| match channel.upstream {
                UpstreamState::Active(upstream) => Some((name, upstream)),
                UpstreamState::Subscribing(_) => None,
            })
            .collect()
    }

    /// Decode `raw` and hand it to every subscriber of `channel`.
    ///
    /// Only the listener of the current entry delivers: a notification read by
    /// a listener of an older `generation` that is still winding down is
    /// dropped. Callbacks run outside the lock. A panicking callback is logged and
    /// skipped; the remaining subscribers still receive the notification.
    pub(crate) fn deliver(&self, channel: &str, generation: Generation, raw: &str) {
        let callbacks: Vec<(SubscriberId, Callback)> = {
            let channels = self.channels.lock();
            match channels.get(channel) {
                Some(entry) if entry.generation == generation => entry
                    .subscribers
                    .iter()
                    .map(|(id, cb)| (id.clone(), cb.clone()))
                    .collect(),
                _ => {
                    trace!(channel, generation, "dropping notification from retired listener");
                    return;
                }
            }
        };

        let payload = payload::decode(raw);
        trace!(channel, subscribers = callbacks.len(), "delivering notification");
        for (subscriber, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&payload))).is_err() {
                warn!(channel, %subscriber, "subscriber callback panicked");
            }
        }
    }

    /// Channels with a live upstream subscription.
    pub fn active_channels(&self) -> Vec<String> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, c)| c.is_active())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |c| c.subscribers.len())
    }

    pub fn is_subscribed(&self, channel: &str, subscriber: &SubscriberId) -> bool {
        self.channels
            .lock()
            .get(channel)
            .is_some_and(|c| c.subscribers.contains_key(subscriber))
    }

    /// Number of channel entries, including ones still being set up.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
