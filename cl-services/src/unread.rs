//! Unread count trackers.
//!
//! `UnreadCountTracker` follows the user-wide totals the server attaches to
//! health checks, new-message and read-state events. `ChannelUnreadTracker`
//! counts unread messages in a single channel from the events scoped to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cl_core::error::ClResult;
use cl_socket::{
    ChannelId, Event, EventFilter, EventKind, SubscriptionBag, SubscriptionRegistry, UnreadTotals,
    UserSnapshot,
};
use tracing::trace;

use crate::current_user::CurrentUserTracker;
use crate::observable::{Observable, ObserverHandle};
use crate::scoped::register_while_observed;
use crate::service::{Service, ServiceState};

type CurrentUser = Observable<Option<UserSnapshot>>;

fn current_user_id(current_user: &CurrentUser) -> Option<String> {
    current_user.get().map(|u| u.id)
}

/// True when the event was performed by someone other than the current user.
fn by_other_user(event: &Event, me: Option<&str>) -> bool {
    match (event.user_id(), me) {
        (Some(actor), Some(me)) => actor != me,
        _ => false,
    }
}

/// Event kinds that can carry the user-wide unread totals.
pub(crate) const UNREAD_TOTALS_KINDS: [EventKind; 11] = [
    EventKind::HealthCheck,
    EventKind::MessageNew,
    EventKind::MessageRead,
    EventKind::ChannelDeleted,
    EventKind::ChannelTruncated,
    EventKind::NotificationMessageNew,
    EventKind::NotificationMarkRead,
    EventKind::NotificationMarkUnread,
    EventKind::NotificationAddedToChannel,
    EventKind::NotificationRemovedFromChannel,
    EventKind::NotificationChannelDeleted,
];

/// User-wide unread totals.
pub struct UnreadCountTracker {
    value: Observable<UnreadTotals>,
    subscriptions: SubscriptionBag,
    stopped: AtomicBool,
}

impl UnreadCountTracker {
    pub fn new(registry: &SubscriptionRegistry, current_user: &CurrentUserTracker) -> Self {
        let value = Observable::new(UnreadTotals::default());
        let subscriptions = SubscriptionBag::new();

        let target = value.downgrade();
        let me = current_user.observable().clone();
        let filter = EventFilter::kinds(UNREAD_TOTALS_KINDS.iter().cloned());
        subscriptions.add(registry.subscribe(filter, move |event| {
            let Some(value) = target.upgrade() else {
                return;
            };
            if let Some(totals) = totals_from(event, current_user_id(&me).as_deref()) {
                trace!("unread totals from {}: {:?}", event.kind, totals);
                value.set(totals);
            }
        }));

        Self {
            value,
            subscriptions,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn current_value(&self) -> UnreadTotals {
        self.value.get()
    }

    pub fn subscribe<F>(&self, listener: F) -> ObserverHandle
    where
        F: Fn(&UnreadTotals) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }

    /// Stop listening for events. The last value stays readable.
    pub fn detach(&self) {
        self.subscriptions.cancel_all();
    }
}

fn totals_from(event: &Event, me: Option<&str>) -> Option<UnreadTotals> {
    if let Some(health) = event.as_health_check() {
        return health.me.map(|me| UnreadTotals {
            channels: me.unread_channels,
            messages: me.total_unread_count,
        });
    }
    if event.kind == EventKind::MessageRead && by_other_user(event, me) {
        return None;
    }
    event.unread_totals()
}

impl Service for UnreadCountTracker {
    fn name(&self) -> &str {
        "unread_count"
    }

    fn state(&self) -> ServiceState {
        if self.stopped.load(Ordering::SeqCst) {
            ServiceState::Stopped
        } else {
            ServiceState::Running
        }
    }

    fn shutdown(&self) -> ClResult<()> {
        self.detach();
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

const CHANNEL_KINDS: [EventKind; 6] = [
    EventKind::MessageNew,
    EventKind::NotificationMessageNew,
    EventKind::MessageRead,
    EventKind::NotificationMarkRead,
    EventKind::NotificationMarkUnread,
    EventKind::ChannelTruncated,
];

/// Unread message count for one channel.
///
/// Listens on the registry only while it has observers.
pub struct ChannelUnreadTracker {
    cid: ChannelId,
    value: Observable<u32>,
    subscriptions: Arc<SubscriptionBag>,
}

impl ChannelUnreadTracker {
    pub fn new(
        cid: ChannelId,
        registry: &SubscriptionRegistry,
        current_user: &CurrentUserTracker,
    ) -> Self {
        let value = Observable::new(0u32);
        let me = current_user.observable().clone();
        let scope = cid.clone();

        let subscriptions = register_while_observed(
            format!("unread tracker {cid}"),
            &value,
            registry.clone(),
            move |registry, target| {
                let scoped = {
                    let target = target.clone();
                    let me = me.clone();
                    registry.subscribe(
                        EventFilter::kinds(CHANNEL_KINDS.iter().cloned()).in_channel(scope.clone()),
                        move |event| {
                            if let Some(value) = target.upgrade() {
                                let me = current_user_id(&me);
                                value.update(|count| apply(count, event, me.as_deref()));
                            }
                        },
                    )
                };
                // Mark-all-read carries no channel id.
                let all_read = registry.subscribe(
                    EventFilter::kind(EventKind::NotificationMarkRead),
                    move |event| {
                        if event.cid.is_none() {
                            if let Some(value) = target.upgrade() {
                                value.set(0);
                            }
                        }
                    },
                );
                vec![scoped, all_read]
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

    /// Whether the tracker currently listens on the registry.
    pub fn is_registered(&self) -> bool {
        !self.subscriptions.is_empty()
    }
}

impl Drop for ChannelUnreadTracker {
    fn drop(&mut self) {
        self.subscriptions.cancel_all();
    }
}

fn apply(count: &mut u32, event: &Event, me: Option<&str>) {
    match event.kind {
        EventKind::MessageNew | EventKind::NotificationMessageNew => {
            let Some(payload) = event.as_message_new() else {
                return;
            };
            let own = match (payload.author_id(), me) {
                (Some(author), Some(me)) => author == me,
                _ => false,
            };
            if own {
                *count = 0;
            } else if payload.message.counts_as_unread() {
                *count = count.saturating_add(1);
            }
        }
        EventKind::MessageRead => {
            if !by_other_user(event, me) {
                *count = 0;
            }
        }
        EventKind::NotificationMarkRead | EventKind::ChannelTruncated => *count = 0,
        EventKind::NotificationMarkUnread => {
            if let Some(unread) = event.as_read_state().and_then(|s| s.unread_messages) {
                *count = unread;
            }
        }
        _ => {}
    }
}
