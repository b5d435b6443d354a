//! Observable values with replay-current-then-stream delivery.
//!
//! Subscribing delivers the current value immediately and then every later
//! change. Each publish carries a version number; an observer never receives
//! a value older than one it has already seen.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::error;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ActivityHook = Arc<dyn Fn(bool) + Send + Sync>;

struct Observer<T> {
    id: u64,
    listener: Listener<T>,
    seen: AtomicU64,
    active: Arc<AtomicBool>,
}

struct Current<T> {
    value: T,
    version: u64,
}

struct ObservableInner<T> {
    current: Mutex<Current<T>>,
    observers: RwLock<Vec<Arc<Observer<T>>>>,
    next_id: AtomicU64,
    on_activity: RwLock<Option<ActivityHook>>,
    /// What the activity hook was last told. Held while the hook runs.
    reported_active: Mutex<bool>,
}

impl<T> ObservableInner<T> {
    /// Remove an observer; returns true if it was the last one.
    fn remove(&self, id: u64) -> bool {
        match self.observers.write() {
            Ok(mut observers) => {
                let before = observers.len();
                observers.retain(|o| o.id != id);
                before != observers.len() && observers.is_empty()
            }
            Err(_) => false,
        }
    }

    /// Bring the activity hook in line with the current observer count.
    ///
    /// Runs after every first-observer and last-observer transition. Calls
    /// are serialized and re-read the count, so racing transitions always
    /// settle on the final state.
    fn sync_activity(&self) {
        let Ok(mut reported) = self.reported_active.lock() else {
            return;
        };
        let active = self.observers.read().map(|o| !o.is_empty()).unwrap_or(false);
        if active == *reported {
            return;
        }
        *reported = active;
        let hook = self.on_activity.read().ok().and_then(|h| h.clone());
        if let Some(hook) = hook {
            hook(active);
        }
    }
}

/// A shared value that notifies observers when it changes.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                current: Mutex::new(Current {
                    value: initial,
                    version: 0,
                }),
                observers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                on_activity: RwLock::new(None),
                reported_active: Mutex::new(false),
            }),
        }
    }

    /// Call `hook(true)` when the first observer arrives and `hook(false)`
    /// when the last one leaves.
    pub fn on_activity<H>(&self, hook: H)
    where
        H: Fn(bool) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.on_activity.write() {
            *slot = Some(Arc::new(hook));
        }
    }

    /// The latest value.
    pub fn get(&self) -> T {
        match self.inner.current.lock() {
            Ok(current) => current.value.clone(),
            Err(poisoned) => poisoned.into_inner().value.clone(),
        }
    }

    /// Replace the value, notifying observers if it changed.
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// Mutate the value in place, notifying observers if it changed.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut T),
    {
        let published = {
            let Ok(mut current) = self.inner.current.lock() else {
                return;
            };
            let mut next = current.value.clone();
            mutate(&mut next);
            if next == current.value {
                None
            } else {
                current.value = next.clone();
                current.version += 1;
                Some((next, current.version))
            }
        };

        if let Some((value, version)) = published {
            let observers = match self.inner.observers.read() {
                Ok(observers) => observers.clone(),
                Err(_) => return,
            };
            for observer in observers {
                deliver(&observer, &value, version);
            }
        }
    }

    /// Observe the value: `listener` gets the current value now and every
    /// change afterwards.
    pub fn subscribe<F>(&self, listener: F) -> ObserverHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));
        let observer = Arc::new(Observer {
            id,
            listener: Arc::new(listener),
            seen: AtomicU64::new(0),
            active: active.clone(),
        });

        let first = match self.inner.observers.write() {
            Ok(mut observers) => {
                observers.push(observer.clone());
                observers.len() == 1
            }
            Err(_) => false,
        };
        if first {
            self.inner.sync_activity();
        }

        let (value, version) = match self.inner.current.lock() {
            Ok(current) => (current.value.clone(), current.version),
            Err(_) => return self.handle(id, active),
        };
        deliver(&observer, &value, version);

        self.handle(id, active)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    /// A reference that does not keep the value alive.
    pub fn downgrade(&self) -> WeakObservable<T> {
        WeakObservable {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn handle(&self, id: u64, active: Arc<AtomicBool>) -> ObserverHandle {
        let inner: Arc<dyn ObserverRegistry> = self.inner.clone();
        ObserverHandle {
            id,
            active,
            owner: Arc::downgrade(&inner),
        }
    }
}

/// Non-owning reference to an [`Observable`].
pub struct WeakObservable<T> {
    inner: Weak<ObservableInner<T>>,
}

impl<T> Clone for WeakObservable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakObservable<T> {
    pub fn upgrade(&self) -> Option<Observable<T>> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }
}

fn deliver<T>(observer: &Observer<T>, value: &T, version: u64) {
    if !observer.active.load(Ordering::SeqCst) {
        return;
    }
    // `seen` holds the last delivered version plus one; zero means nothing yet.
    let tag = version + 1;
    if observer.seen.fetch_max(tag, Ordering::SeqCst) >= tag {
        return;
    }
    call(observer, value);
}

fn call<T>(observer: &Observer<T>, value: &T) {
    let listener = observer.listener.clone();
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(value))).is_err() {
        error!("observer {} panicked", observer.id);
    }
}

impl<T: fmt::Debug + Clone + PartialEq + Send + Sync + 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.get())
            .field("observers", &self.observer_count())
            .finish()
    }
}

trait ObserverRegistry: Send + Sync {
    fn cancel(&self, id: u64);
}

impl<T: Send + Sync> ObserverRegistry for ObservableInner<T> {
    fn cancel(&self, id: u64) {
        if self.remove(id) {
            self.sync_activity();
        }
    }
}

/// Cancellation handle for an observer.
#[derive(Clone)]
pub struct ObserverHandle {
    id: u64,
    active: Arc<AtomicBool>,
    owner: Weak<dyn ObserverRegistry>,
}

impl ObserverHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop notifications. Idempotent and safe from inside the listener.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(owner) = self.owner.upgrade() {
                owner.cancel(self.id);
            }
        }
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
