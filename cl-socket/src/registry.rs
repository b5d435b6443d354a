//! Event subscription registry.
//!
//! Subscribers register a filter and a callback and get a handle back.
//! Dispatch walks a snapshot of the registrations in registration order, so
//! callbacks may subscribe or cancel (including themselves) while an event
//! is being delivered. A handle cancelled before its turn in the current
//! dispatch is skipped.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{error, trace};
use uuid::Uuid;

use crate::events::{ChannelId, Event, EventKind};

/// Which events a subscriber wants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    kinds: Option<HashSet<EventKind>>,
    scope: Option<ChannelId>,
}

impl EventFilter {
    /// Every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Events of one kind.
    pub fn kind(kind: EventKind) -> Self {
        Self::kinds([kind])
    }

    /// Events of any of the given kinds.
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            scope: None,
        }
    }

    /// Restrict to events scoped to `cid`.
    pub fn in_channel(mut self, cid: ChannelId) -> Self {
        self.scope = Some(cid);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        match &self.scope {
            Some(scope) => event.cid.as_ref() == Some(scope),
            None => true,
        }
    }
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Registration {
    id: Uuid,
    filter: EventFilter,
    callback: Callback,
    active: Arc<AtomicBool>,
}

struct RegistryInner {
    entries: RwLock<Vec<Arc<Registration>>>,
}

impl RegistryInner {
    fn remove(&self, id: Uuid) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|r| r.id != id);
        }
    }
}

/// Ordered set of event subscriptions. Cloning shares the registry.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register `callback` for events matching `filter`.
    pub fn subscribe<F>(&self, filter: EventFilter, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handle = self.new_handle();
        self.insert(&handle, filter, Arc::new(callback));
        handle
    }

    /// Register a callback that is delivered at most one event.
    pub fn subscribe_once<F>(&self, filter: EventFilter, callback: F) -> SubscriptionHandle
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        let handle = self.new_handle();
        let own = handle.clone();
        let slot = Mutex::new(Some(callback));
        self.insert(
            &handle,
            filter,
            Arc::new(move |event: &Event| {
                own.cancel();
                let callback = slot.lock().ok().and_then(|mut s| s.take());
                if let Some(callback) = callback {
                    callback(event);
                }
            }),
        );
        handle
    }

    /// Deliver `event` to every active matching subscriber, in registration
    /// order. Returns the number of callbacks invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<Registration>> = match self.inner.entries.read() {
            Ok(entries) => entries.clone(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for registration in snapshot {
            if !registration.active.load(Ordering::SeqCst) || !registration.filter.matches(event) {
                continue;
            }
            let callback = registration.callback.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    "subscriber {} panicked while handling {}",
                    registration.id, event.kind
                );
            }
            delivered += 1;
        }
        trace!("dispatched {} to {} subscribers", event.kind, delivered);
        delivered
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    fn new_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            id: Uuid::new_v4(),
            active: Arc::new(AtomicBool::new(true)),
            registry: Arc::downgrade(&self.inner),
        }
    }

    fn insert(&self, handle: &SubscriptionHandle, filter: EventFilter, callback: Callback) {
        let registration = Arc::new(Registration {
            id: handle.id,
            filter,
            callback,
            active: handle.active.clone(),
        });
        if let Ok(mut entries) = self.inner.entries.write() {
            entries.push(registration);
        }
    }
}

/// Cancellation handle for one subscription. Clones refer to the same
/// subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    active: Arc<AtomicBool>,
    registry: Weak<RegistryInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery. Idempotent and safe to call from inside a callback.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(inner) = self.registry.upgrade() {
                inner.remove(self.id);
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Owns a group of subscriptions torn down together.
#[derive(Default)]
pub struct SubscriptionBag {
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl SubscriptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: SubscriptionHandle) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.push(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every held subscription.
    pub fn cancel_all(&self) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => return,
        };
        for handle in handles {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn event(kind: EventKind, cid: Option<&str>) -> Event {
        let data = match cid {
            Some(cid) => json!({"type": kind.as_str(), "cid": cid}),
            None => json!({"type": kind.as_str()}),
        };
        Event::from_data(kind, data).unwrap()
    }

    #[test]
    fn test_filter_matching() {
        let cid: ChannelId = "messaging:general".parse().unwrap();
        let filter = EventFilter::kind(EventKind::MessageNew).in_channel(cid);

        assert!(filter.matches(&event(EventKind::MessageNew, Some("messaging:general"))));
        assert!(!filter.matches(&event(EventKind::MessageNew, Some("messaging:other"))));
        assert!(!filter.matches(&event(EventKind::MessageRead, Some("messaging:general"))));
        assert!(!filter.matches(&event(EventKind::MessageNew, None)));
        assert!(EventFilter::all().matches(&event(EventKind::HealthCheck, None)));
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            registry.subscribe(EventFilter::all(), move |_| order.lock().unwrap().push(i));
        }

        assert_eq!(registry.dispatch(&event(EventKind::TypingStart, None)), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let handle = registry.subscribe(EventFilter::all(), |_| {});
        assert_eq!(registry.subscriber_count(), 1);

        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
        assert_eq!(registry.subscriber_count(), 0);
        assert_eq!(registry.dispatch(&event(EventKind::TypingStart, None)), 0);
    }

    #[test]
    fn test_cancel_inside_own_callback() {
        let registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let handle = {
            let count = count.clone();
            let slot = slot.clone();
            registry.subscribe(EventFilter::all(), move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(own) = slot.lock().unwrap().as_ref() {
                    own.cancel();
                }
            })
        };
        *slot.lock().unwrap() = Some(handle);

        registry.dispatch(&event(EventKind::TypingStart, None));
        registry.dispatch(&event(EventKind::TypingStart, None));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_cancelled_mid_dispatch_is_skipped() {
        let registry = SubscriptionRegistry::new();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        {
            let second_slot = second_slot.clone();
            registry.subscribe(EventFilter::all(), move |_| {
                if let Some(second) = second_slot.lock().unwrap().as_ref() {
                    second.cancel();
                }
            });
        }
        let second = {
            let second_calls = second_calls.clone();
            registry.subscribe(EventFilter::all(), move |_| {
                second_calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        *second_slot.lock().unwrap() = Some(second);

        assert_eq!(registry.dispatch(&event(EventKind::TypingStart, None)), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_during_dispatch() {
        let registry = SubscriptionRegistry::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        {
            let registry_clone = registry.clone();
            let late_calls = late_calls.clone();
            registry.subscribe_once(EventFilter::all(), move |_| {
                registry_clone.subscribe(EventFilter::all(), move |_| {
                    late_calls.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        // The subscriber added mid-dispatch only sees later events.
        registry.dispatch(&event(EventKind::TypingStart, None));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        registry.dispatch(&event(EventKind::TypingStop, None));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_once() {
        let registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = {
            let count = count.clone();
            registry.subscribe_once(EventFilter::kind(EventKind::MessageNew), move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.dispatch(&event(EventKind::TypingStart, None));
        assert!(handle.is_active());
        registry.dispatch(&event(EventKind::MessageNew, None));
        registry.dispatch(&event(EventKind::MessageNew, None));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_dispatch() {
        let registry = SubscriptionRegistry::new();
        let reached = Arc::new(AtomicBool::new(false));

        registry.subscribe(EventFilter::all(), |_| panic!("boom"));
        {
            let reached = reached.clone();
            registry.subscribe(EventFilter::all(), move |_| reached.store(true, Ordering::SeqCst));
        }

        registry.dispatch(&event(EventKind::TypingStart, None));
        assert!(reached.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bag_cancel_all() {
        let registry = SubscriptionRegistry::new();
        let bag = SubscriptionBag::new();
        bag.add(registry.subscribe(EventFilter::all(), |_| {}));
        bag.add(registry.subscribe(EventFilter::kind(EventKind::MessageNew), |_| {}));
        assert_eq!(bag.len(), 2);

        bag.cancel_all();
        assert!(bag.is_empty());
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_handle_outlives_registry() {
        let handle = {
            let registry = SubscriptionRegistry::new();
            registry.subscribe(EventFilter::all(), |_| {})
        };
        handle.cancel();
        assert!(!handle.is_active());
    }
}
