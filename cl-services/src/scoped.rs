//! Registry registration tied to observer activity.
//!
//! Per-channel trackers only listen on the registry while somebody observes
//! them: the first observer installs the registrations and the last one to
//! leave removes them again.

use std::sync::Arc;

use cl_socket::{SubscriptionBag, SubscriptionHandle, SubscriptionRegistry};
use tracing::debug;

use crate::observable::{Observable, WeakObservable};

/// Install `install`'s registrations on `registry` whenever `value` gains its
/// first observer, and cancel them when it loses its last.
pub(crate) fn register_while_observed<T, I>(
    label: String,
    value: &Observable<T>,
    registry: SubscriptionRegistry,
    install: I,
) -> Arc<SubscriptionBag>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    I: Fn(&SubscriptionRegistry, WeakObservable<T>) -> Vec<SubscriptionHandle>
        + Send
        + Sync
        + 'static,
{
    let bag = Arc::new(SubscriptionBag::new());
    let hook_bag = bag.clone();
    let target = value.downgrade();

    value.on_activity(move |active| {
        if active {
            for handle in install(&registry, target.clone()) {
                hook_bag.add(handle);
            }
            debug!("{label}: registered ({} subscriptions)", hook_bag.len());
        } else {
            hook_bag.cancel_all();
            debug!("{label}: unregistered");
        }
    });

    bag
}
