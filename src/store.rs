//! Reactive holder of the canonical state reference.

use crate::signals::{Derived, Readable, Signal, Subscription};
use crate::state::path;
use crate::types::StateEquality;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Option<Arc<Value>>,
}

/// Equality-gated store over one state value.
///
/// Replacing the state with an equal value is a no-op. Writes made inside
/// [`Store::batch`] are coalesced into a single downstream notification.
pub struct Store {
    signal: Signal<Arc<Value>>,
    equals: StateEquality,
    batch: Mutex<BatchState>,
}

impl Store {
    pub fn new(initial: Arc<Value>, equals: StateEquality) -> Self {
        let eq = Arc::clone(&equals);
        let signal = Signal::with_equality(
            initial,
            Arc::new(move |a: &Arc<Value>, b: &Arc<Value>| Arc::ptr_eq(a, b) || eq(&**a, &**b)),
        );
        Self {
            signal,
            equals,
            batch: Mutex::new(BatchState::default()),
        }
    }

    /// Current value, including writes still pending inside a batch.
    pub fn get(&self) -> Arc<Value> {
        if let Some(pending) = self.batch.lock().pending.as_ref() {
            return Arc::clone(pending);
        }
        self.signal.get()
    }

    /// Replace the state. Returns whether the value differs from the current one.
    pub fn set(&self, next: Arc<Value>) -> bool {
        {
            let mut batch = self.batch.lock();
            if batch.depth > 0 {
                let current = batch.pending.clone().unwrap_or_else(|| self.signal.get());
                let changed = !(Arc::ptr_eq(&current, &next) || (self.equals)(&*current, &*next));
                if changed {
                    batch.pending = Some(next);
                }
                return changed;
            }
        }
        self.signal.set(next)
    }

    /// Run `f` with notifications deferred; the last write is flushed once
    /// when the outermost batch ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.batch.lock().depth += 1;
        let _guard = BatchGuard { store: self };
        f()
    }

    /// Observe every committed change of the whole state.
    pub fn subscribe(&self, observer: impl Fn(&Arc<Value>) + Send + Sync + 'static) -> Subscription {
        self.signal.subscribe(observer)
    }

    /// Observe changes of a single (dotted) key.
    ///
    /// The observer fires only when the value under `key` changes. The watch
    /// lives as long as the returned guard.
    pub fn watch(&self, key: &str, observer: impl Fn(&Value) + Send + Sync + 'static) -> KeyWatch {
        let segments = path::parse(key);
        let source = self.signal.clone();
        let derived = Derived::new(move |t| {
            t.with(&source, |state: &Arc<Value>| {
                path::get(state, &segments).cloned().unwrap_or(Value::Null)
            })
        });
        let subscription = derived.subscribe(observer);
        KeyWatch {
            derived,
            subscription: Some(subscription),
        }
    }

    /// Handle to the underlying signal, for building derivations.
    pub fn signal_handle(&self) -> Signal<Arc<Value>> {
        self.signal.clone()
    }

    /// Release every subscriber, including derivations built on the store.
    pub fn dispose(&self) {
        self.signal.clear_subscribers();
    }

    fn flush(&self) {
        let pending = {
            let mut batch = self.batch.lock();
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return;
            }
            batch.pending.take()
        };
        if let Some(next) = pending {
            self.signal.set(next);
        }
    }
}

impl Readable<Arc<Value>> for Store {
    fn signal(&self) -> &Signal<Arc<Value>> {
        &self.signal
    }
}

struct BatchGuard<'a> {
    store: &'a Store,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.store.flush();
    }
}

/// Guard for a keyed watch created by [`Store::watch`].
pub struct KeyWatch {
    derived: Derived<Value>,
    subscription: Option<Subscription>,
}

impl KeyWatch {
    /// Current value under the watched key.
    pub fn value(&self) -> Value {
        self.derived.get()
    }
}

impl Drop for KeyWatch {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
