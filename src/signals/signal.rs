//! Value cells with equality-gated notification.

use super::propagation::{Dependent, Propagation};
use crate::types::{EqualityFn, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased view of a signal, used by derivations to (un)register
/// themselves without knowing the value type.
pub(crate) trait Dependency: Send + Sync {
    fn source_id(&self) -> u64;
    fn height(&self) -> usize;
    fn watch(&self, dependent: Weak<dyn Dependent>) -> SubscriptionId;
    fn unwatch(&self, id: SubscriptionId);
}

enum Subscriber<T> {
    Observer(Callback<T>),
    Dependent(Weak<dyn Dependent>),
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        match self {
            Subscriber::Observer(callback) => Subscriber::Observer(Arc::clone(callback)),
            Subscriber::Dependent(dependent) => Subscriber::Dependent(Weak::clone(dependent)),
        }
    }
}

pub(crate) struct SignalInner<T> {
    source_id: u64,
    /// 0 for plain signals; a derivation's output sits above its inputs.
    height: AtomicUsize,
    value: RwLock<T>,
    /// Subscribers in registration order.
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber<T>)>>,
    equals: EqualityFn<T>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> SignalInner<T> {
    fn add(&self, subscriber: Subscriber<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.lock().push((id, subscriber));
        id
    }

    fn remove(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(sub, _)| *sub != id);
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for SignalInner<T> {
    fn source_id(&self) -> u64 {
        self.source_id
    }

    fn height(&self) -> usize {
        self.height.load(Ordering::SeqCst)
    }

    fn watch(&self, dependent: Weak<dyn Dependent>) -> SubscriptionId {
        self.add(Subscriber::Dependent(dependent))
    }

    fn unwatch(&self, id: SubscriptionId) {
        self.remove(id);
    }
}

/// A reactive value cell.
///
/// Cloning a `Signal` yields another handle to the same cell.
pub struct Signal<T> {
    pub(crate) inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Signal<T> {
    /// Create a signal compared with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Arc::new(|a: &T, b: &T| a == b))
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a signal with a custom equality policy.
    pub fn with_equality(value: T, equals: EqualityFn<T>) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                source_id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
                height: AtomicUsize::new(0),
                value: RwLock::new(value),
                subscribers: Mutex::new(Vec::new()),
                equals,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.read())
    }

    /// Replace the value. Subscribers run only if the value changed.
    ///
    /// Every derivation downstream settles before any observer runs.
    /// Returns whether a change was observed.
    pub fn set(&self, value: T) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.set_in(value, &mut propagation);
        propagation.run();
        changed
    }

    /// Modify a copy of the value and write it back through [`Signal::set`].
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }

    /// Register an observer for subsequent changes.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.add(Subscriber::Observer(Arc::new(observer)));
        let dependency: Arc<dyn Dependency> = self.inner.clone();
        Subscription {
            id,
            source: Arc::downgrade(&dependency),
        }
    }

    /// Number of registered subscribers, including derivations.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Drop every subscriber.
    pub fn clear_subscribers(&self) {
        self.inner.subscribers.lock().clear();
    }

    pub(crate) fn dependency(&self) -> Arc<dyn Dependency> {
        self.inner.clone()
    }

    pub(crate) fn height(&self) -> usize {
        self.inner.height.load(Ordering::SeqCst)
    }

    pub(crate) fn set_height(&self, height: usize) {
        self.inner.height.store(height, Ordering::SeqCst);
    }

    pub(crate) fn source_id(&self) -> u64 {
        self.inner.source_id
    }

    /// Write without flushing: dependents are scheduled on `propagation`
    /// and observers deferred until it runs.
    pub(crate) fn set_in(&self, value: T, propagation: &mut Propagation) -> bool {
        // Equality is user code; it must not run under the write lock.
        if self.with(|current| (self.inner.equals)(current, &value)) {
            return false;
        }
        *self.inner.value.write() = value.clone();
        self.schedule(value, propagation);
        true
    }

    fn schedule(&self, value: T, propagation: &mut Propagation) {
        // Observers may (un)subscribe, so never hold the lock while they run.
        let subscribers: Vec<Subscriber<T>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, sub)| sub.clone())
            .collect();
        let value = Arc::new(value);
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Dependent(dependent) => propagation.schedule(&dependent),
                Subscriber::Observer(callback) => {
                    let value = Arc::clone(&value);
                    propagation.defer(move || callback(&*value));
                }
            }
        }
    }
}

/// Anything a derivation can read through a [`Tracker`](super::Tracker).
pub trait Readable<T> {
    fn signal(&self) -> &Signal<T>;
}

impl<T> Readable<T> for Signal<T> {
    fn signal(&self) -> &Signal<T> {
        self
    }
}

/// Registration handle returned by `subscribe`.
///
/// Dropping the handle keeps the observer registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: SubscriptionId,
    source: Weak<dyn Dependency>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the observer. A no-op if the source is already gone.
    pub fn unsubscribe(self) {
        if let Some(source) = self.source.upgrade() {
            source.unwatch(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_set_notifies_only_on_change() {
        let signal = Signal::new(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!signal.set(1));
        assert!(signal.set(2));
        assert!(!signal.set(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let signal = Signal::new("a".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = signal.subscribe(move |v: &String| sink.lock().push(v.clone()));

        signal.set("b".to_string());
        sub.unsubscribe();
        signal.set("c".to_string());

        assert_eq!(*seen.lock(), vec!["b".to_string()]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_custom_equality() {
        // Case-insensitive comparison.
        let signal = Signal::with_equality(
            "Hello".to_string(),
            Arc::new(|a: &String, b: &String| a.eq_ignore_ascii_case(b)),
        );
        assert!(!signal.set("HELLO".to_string()));
        assert_eq!(signal.get(), "Hello");
        assert!(signal.set("World".to_string()));
    }

    #[test]
    fn test_subscriber_may_unsubscribe_during_notify() {
        let signal = Signal::new(0);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in = Arc::clone(&slot);
        let sub = signal.subscribe(move |_| {
            if let Some(sub) = slot_in.lock().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        signal.set(1);
        assert_eq!(signal.subscriber_count(), 0);
    }
}
