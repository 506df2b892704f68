//! Derived (computed) signals with dynamic dependency discovery.

use super::propagation::{Dependent, Propagation};
use super::signal::{Dependency, Readable, Signal, Subscription};
use crate::types::{EqualityFn, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

/// Records which signals a computation reads.
///
/// A fresh tracker is handed to the compute closure on every run; only the
/// signals read through it become dependencies of that run.
#[derive(Default)]
pub struct Tracker {
    seen: HashSet<u64>,
    dependencies: Vec<Arc<dyn Dependency>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a signal (or derived/selector) and record it as a dependency.
    pub fn get<T, R>(&mut self, source: &R) -> T
    where
        T: Clone + Send + Sync + 'static,
        R: Readable<T> + ?Sized,
    {
        let signal = source.signal();
        self.track(signal);
        signal.get()
    }

    /// Borrow a tracked value without cloning it.
    pub fn with<T, R, U>(&mut self, source: &R, f: impl FnOnce(&T) -> U) -> U
    where
        T: Clone + Send + Sync + 'static,
        R: Readable<T> + ?Sized,
    {
        let signal = source.signal();
        self.track(signal);
        signal.with(f)
    }

    /// Number of distinct dependencies recorded so far.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    fn track<T: Clone + Send + Sync + 'static>(&mut self, signal: &Signal<T>) {
        let dependency = signal.dependency();
        if self.seen.insert(dependency.source_id()) {
            self.dependencies.push(dependency);
        }
    }
}

type Compute<T> = Box<dyn Fn(&mut Tracker) -> T + Send + Sync>;

struct DerivedInner<T> {
    output: Signal<T>,
    compute: Compute<T>,
    bindings: Mutex<Vec<(Arc<dyn Dependency>, SubscriptionId)>>,
}

impl<T: Clone + Send + Sync + 'static> DerivedInner<T> {
    fn recompute_in(self: &Arc<Self>, propagation: &mut Propagation) {
        let mut tracker = Tracker::new();
        let value = (self.compute)(&mut tracker);
        self.rebind(tracker.dependencies);
        self.output.set_in(value, propagation);
    }

    /// Drop the previous dependency registrations and register on `dependencies`.
    fn rebind(self: &Arc<Self>, dependencies: Vec<Arc<dyn Dependency>>) {
        let previous = std::mem::take(&mut *self.bindings.lock());
        for (dependency, id) in previous {
            dependency.unwatch(id);
        }

        let height = dependencies
            .iter()
            .map(|dependency| dependency.height() + 1)
            .max()
            .unwrap_or(1);
        self.output.set_height(height);

        let weak: Weak<dyn Dependent> = Arc::downgrade(self) as Weak<dyn Dependent>;
        let bindings = dependencies
            .into_iter()
            .map(|dependency| {
                let id = dependency.watch(Weak::clone(&weak));
                (dependency, id)
            })
            .collect();
        *self.bindings.lock() = bindings;
    }
}

impl<T: Clone + Send + Sync + 'static> Dependent for DerivedInner<T> {
    fn node_id(&self) -> u64 {
        self.output.source_id()
    }

    fn height(&self) -> usize {
        self.output.height()
    }

    fn recompute(self: Arc<Self>, propagation: &mut Propagation) {
        self.recompute_in(propagation);
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        for (dependency, id) in self.bindings.get_mut().drain(..) {
            dependency.unwatch(id);
        }
    }
}

/// A signal whose value is computed from other signals.
///
/// The computation runs once on construction and again whenever any
/// dependency read during the previous run changes. A write that reaches
/// the same derivation along several paths recomputes it once, after every
/// input has settled. The result is written
/// through an equality-gated [`Signal`], so recomputing to an equal value
/// does not notify downstream subscribers.
pub struct Derived<T> {
    inner: Arc<DerivedInner<T>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Derived<T> {
    pub fn new(compute: impl Fn(&mut Tracker) -> T + Send + Sync + 'static) -> Self {
        Self::with_equality(compute, Arc::new(|a: &T, b: &T| a == b))
    }
}

impl<T: Clone + Send + Sync + 'static> Derived<T> {
    pub fn with_equality(
        compute: impl Fn(&mut Tracker) -> T + Send + Sync + 'static,
        equals: EqualityFn<T>,
    ) -> Self {
        let mut tracker = Tracker::new();
        let initial = compute(&mut tracker);
        let inner = Arc::new(DerivedInner {
            output: Signal::with_equality(initial, equals),
            compute: Box::new(compute),
            bindings: Mutex::new(Vec::new()),
        });
        inner.rebind(tracker.dependencies);
        Self { inner }
    }

    pub fn get(&self) -> T {
        self.inner.output.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.output.with(f)
    }

    /// Observe changes of the computed value.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.inner.output.subscribe(observer)
    }

    /// Number of signals the last computation depended on.
    pub fn dependency_count(&self) -> usize {
        self.inner.bindings.lock().len()
    }

    /// Force a recomputation.
    pub fn refresh(&self) {
        let mut propagation = Propagation::new();
        self.inner.recompute_in(&mut propagation);
        propagation.run();
    }
}

impl<T> Readable<T> for Derived<T> {
    fn signal(&self) -> &Signal<T> {
        &self.inner.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sum_recomputes_once() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let (ra, rb) = (a.clone(), b.clone());
        let sum = Derived::new(move |t| t.get(&ra) + t.get(&rb));
        assert_eq!(sum.get(), 3);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sum.subscribe(move |v| sink.lock().push(*v));

        a.set(4);
        assert_eq!(sum.get(), 6);
        assert_eq!(*seen.lock(), vec![6]);
    }

    #[test]
    fn test_conditional_dependencies_are_rebuilt() {
        let use_left = Signal::new(true);
        let left = Signal::new(10);
        let right = Signal::new(20);
        let runs = Arc::new(AtomicUsize::new(0));

        let (c, l, r, n) = (
            use_left.clone(),
            left.clone(),
            right.clone(),
            Arc::clone(&runs),
        );
        let picked = Derived::new(move |t| {
            n.fetch_add(1, Ordering::SeqCst);
            if t.get(&c) {
                t.get(&l)
            } else {
                t.get(&r)
            }
        });
        assert_eq!(picked.get(), 10);
        assert_eq!(picked.dependency_count(), 2);

        // `right` is not a dependency yet.
        right.set(21);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        use_left.set(false);
        assert_eq!(picked.get(), 21);
        assert_eq!(right.subscriber_count(), 1);
        assert_eq!(left.subscriber_count(), 0);

        // `left` was dropped from the dependency set.
        left.set(11);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unchanged_result_does_not_cascade() {
        let n = Signal::new(3);
        let rn = n.clone();
        let parity = Derived::new(move |t| t.get(&rn) % 2);
        let p = parity.clone();
        let label = Derived::new(move |t| if t.get(&p) == 0 { "even" } else { "odd" });

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        label.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        n.set(5);
        assert_eq!(label.get(), "odd");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        n.set(6);
        assert_eq!(label.get(), "even");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_dependencies() {
        let source = Signal::new(1);
        let s = source.clone();
        let doubled = Derived::new(move |t| t.get(&s) * 2);
        assert_eq!(source.subscriber_count(), 1);
        drop(doubled);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_diamond_recomputes_once_with_settled_inputs() {
        let source = Signal::new(1);
        let (l, r) = (source.clone(), source.clone());
        let left = Derived::new(move |t| t.get(&l) + 1);
        let right = Derived::new(move |t| t.get(&r) * 10);

        let runs = Arc::new(AtomicUsize::new(0));
        let (lc, rc, n) = (left.clone(), right.clone(), Arc::clone(&runs));
        let joined = Derived::new(move |t| {
            n.fetch_add(1, Ordering::SeqCst);
            (t.get(&lc), t.get(&rc))
        });
        assert_eq!(joined.get(), (2, 10));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        joined.subscribe(move |v| sink.lock().push(*v));

        source.set(2);
        assert_eq!(*seen.lock(), vec![(3, 20)]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_uneven_depths_settle_before_observers() {
        // `total` reads `base` directly and through two derived layers.
        let base = Signal::new(1);
        let b1 = base.clone();
        let doubled = Derived::new(move |t| t.get(&b1) * 2);
        let d = doubled.clone();
        let quadrupled = Derived::new(move |t| t.get(&d) * 2);
        let (b2, q) = (base.clone(), quadrupled.clone());
        let total = Derived::new(move |t| t.get(&b2) + t.get(&q));
        assert_eq!(total.get(), 5);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        total.subscribe(move |v| sink.lock().push(*v));

        base.set(2);
        assert_eq!(*seen.lock(), vec![10]);
    }

    #[test]
    fn test_refresh_after_external_change() {
        let flag = Arc::new(AtomicUsize::new(1));
        let f = Arc::clone(&flag);
        let read = Derived::new(move |_| f.load(Ordering::SeqCst));
        flag.store(7, Ordering::SeqCst);
        assert_eq!(read.get(), 1);
        read.refresh();
        assert_eq!(read.get(), 7);
    }
}
