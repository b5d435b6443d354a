//! Current user tracker.
//!
//! Holds the snapshot of the connected user. The local snapshot seeded at
//! connect time is replaced wholesale by the `me` object of the first
//! health check on each connection; profile and presence events for the same
//! id are merged in, and unread aggregates are copied from any event that
//! carries them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cl_core::error::ClResult;
use cl_socket::{Event, EventFilter, EventKind, SubscriptionBag, SubscriptionRegistry, UserSnapshot};
use tracing::{debug, info};

use crate::observable::{Observable, ObserverHandle};
use crate::service::{Service, ServiceState};
use crate::unread::UNREAD_TOTALS_KINDS;

/// Tracks the connected user.
pub struct CurrentUserTracker {
    value: Observable<Option<UserSnapshot>>,
    subscriptions: SubscriptionBag,
    stopped: AtomicBool,
}

impl CurrentUserTracker {
    /// Create the tracker and start listening on `registry`.
    pub fn new(registry: &SubscriptionRegistry) -> Self {
        let value: Observable<Option<UserSnapshot>> = Observable::new(None);
        let subscriptions = SubscriptionBag::new();

        let target = value.downgrade();
        // Connection whose handshake user has been adopted.
        let adopted: Mutex<Option<String>> = Mutex::new(None);
        let filter = EventFilter::kinds(
            UNREAD_TOTALS_KINDS
                .iter()
                .cloned()
                .chain([EventKind::UserUpdated, EventKind::UserPresenceChanged]),
        );
        subscriptions.add(registry.subscribe(filter, move |event| {
            let Some(value) = target.upgrade() else {
                return;
            };
            let mut adopted = match adopted.lock() {
                Ok(adopted) => adopted,
                Err(poisoned) => poisoned.into_inner(),
            };
            value.update(|current| apply(current, event, &mut *adopted));
        }));

        Self {
            value,
            subscriptions,
            stopped: AtomicBool::new(false),
        }
    }

    /// Latest known snapshot of the current user.
    pub fn current_value(&self) -> Option<UserSnapshot> {
        self.value.get()
    }

    /// Id of the current user, if known.
    pub fn user_id(&self) -> Option<String> {
        self.value.get().map(|u| u.id)
    }

    pub fn subscribe<F>(&self, listener: F) -> ObserverHandle
    where
        F: Fn(&Option<UserSnapshot>) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }

    /// Seed the snapshot built from local credentials before the server
    /// confirms the session.
    pub fn set_local_user(&self, user: UserSnapshot) {
        debug!("seeding local user {}", user.id);
        self.value.set(Some(user));
    }

    /// Forget the current user.
    pub fn clear(&self) {
        self.value.set(None);
    }

    pub(crate) fn observable(&self) -> &Observable<Option<UserSnapshot>> {
        &self.value
    }

    /// Stop listening for events. The last value stays readable.
    pub fn detach(&self) {
        self.subscriptions.cancel_all();
    }
}

fn apply(current: &mut Option<UserSnapshot>, event: &Event, adopted: &mut Option<String>) {
    let mut repeated_me = None;
    if let Some(health) = event.as_health_check() {
        let connection_id = health.connection_id.filter(|id| !id.is_empty());
        match (health.me, connection_id) {
            (Some(me), Some(connection_id)) if adopted.as_deref() != Some(connection_id.as_str()) => {
                info!("current user confirmed by server: {} ({connection_id})", me.id);
                *current = Some(me);
                *adopted = Some(connection_id);
                return;
            }
            (me, _) => repeated_me = me,
        }
    }

    let Some(user) = current.as_mut() else {
        return;
    };

    if let Some(updated) = event.as_user_update() {
        if updated.id == user.id {
            merge(user, updated);
        }
    }

    if let Some(me) = repeated_me.filter(|me| me.id == user.id) {
        user.total_unread_count = me.total_unread_count;
        user.unread_channels = me.unread_channels;
    }

    // Totals in read-state events describe the acting user, who may not be us.
    let about_someone_else = event.kind == EventKind::MessageRead
        && event.user_id().is_some_and(|id| id != user.id);
    if !about_someone_else {
        if let Some(totals) = event.unread_totals() {
            user.total_unread_count = totals.messages;
            user.unread_channels = totals.channels;
        }
    }
}

/// Profile events do not carry unread aggregates; keep ours.
fn merge(user: &mut UserSnapshot, updated: UserSnapshot) {
    let total_unread_count = user.total_unread_count;
    let unread_channels = user.unread_channels;
    let mut extra = std::mem::take(&mut user.extra);
    extra.extend(updated.extra.clone());

    *user = UserSnapshot {
        name: updated.name.or(user.name.take()),
        image: updated.image.or(user.image.take()),
        role: updated.role.or(user.role.take()),
        extra,
        total_unread_count,
        unread_channels,
        ..updated
    };
}

impl Service for CurrentUserTracker {
    fn name(&self) -> &str {
        "current_user"
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
