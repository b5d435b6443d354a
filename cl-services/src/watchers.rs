//! Watcher count tracker for a single channel.

use std::sync::Arc;

use cl_socket::{ChannelId, EventFilter, EventKind, SubscriptionBag, SubscriptionRegistry};

use crate::observable::{Observable, ObserverHandle};
use crate::scoped::register_while_observed;

const WATCHER_KINDS: [EventKind; 3] = [
    EventKind::UserWatchingStart,
    EventKind::UserWatchingStop,
    EventKind::MessageNew,
];

/// Number of users currently watching a channel, as last reported by the
/// server. Listens on the registry only while it has observers.
pub struct WatcherCountTracker {
    cid: ChannelId,
    value: Observable<u32>,
    subscriptions: Arc<SubscriptionBag>,
}

impl WatcherCountTracker {
    pub fn new(cid: ChannelId, registry: &SubscriptionRegistry) -> Self {
        let value = Observable::new(0u32);
        let scope = cid.clone();

        let subscriptions = register_while_observed(
            format!("watcher tracker {cid}"),
            &value,
            registry.clone(),
            move |registry, target| {
                let filter =
                    EventFilter::kinds(WATCHER_KINDS.iter().cloned()).in_channel(scope.clone());
                vec![registry.subscribe(filter, move |event| {
                    if let (Some(value), Some(count)) = (target.upgrade(), event.watcher_count()) {
                        value.set(count);
                    }
                })]
            },
        );

        Self {
            cid,
            value,
            subscriptions,
        }
    }

    pub fn cid(&self) -> &ChannelId {
        &self.cid
    }

    pub fn current_value(&self) -> u32 {
        self.value.get()
    }

    pub fn subscribe<F>(&self, listener: F) -> ObserverHandle
    where
        F: Fn(&u32) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }

    /// Set the count from a fresh channel query.
    pub fn seed(&self, count: u32) {
        self.value.set(count);
    }

    pub fn is_registered(&self) -> bool {
        !self.subscriptions.is_empty()
    }
}

impl Drop for WatcherCountTracker {
    fn drop(&mut self) {
        self.subscriptions.cancel_all();
    }
}
