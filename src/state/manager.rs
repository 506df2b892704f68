//! Canonical state, undo/redo history and snapshot stack.

use super::{path, Draft, Selector};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::persist::PersistedSnapshot;
use crate::signals::{Derived, Signal, Subscription};
use crate::store::Store;
use crate::types::{deep_equal, EqualityFn, StateEquality, Timestamp};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// State manager configuration.
#[derive(Clone)]
pub struct StateConfig {
    /// Maximum undo entries kept.
    /// Default: 100
    pub max_undo_history: usize,

    /// Maximum snapshots kept.
    /// Default: 50
    pub max_snapshots: usize,

    /// Trim the oldest history/snapshot entries once a bound is exceeded.
    /// Default: true
    pub auto_cleanup: bool,

    /// Delay applied to in-place mutation notifications. `None` notifies
    /// immediately.
    pub mutation_debounce: Option<Duration>,

    /// Deep-equality policy (defaults to structural `==`).
    pub equality: Option<StateEquality>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_undo_history: 100,
            max_snapshots: 50,
            auto_cleanup: true,
            mutation_debounce: None,
            equality: None,
        }
    }
}

impl StateConfig {
    pub fn with_max_undo_history(mut self, max: usize) -> Self {
        self.max_undo_history = max;
        self
    }

    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max;
        self
    }

    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    pub fn with_mutation_debounce(mut self, delay: Duration) -> Self {
        self.mutation_debounce = Some(delay);
        self
    }

    pub fn with_equality(mut self, equality: StateEquality) -> Self {
        self.equality = Some(equality);
        self
    }
}

impl fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateConfig")
            .field("max_undo_history", &self.max_undo_history)
            .field("max_snapshots", &self.max_snapshots)
            .field("auto_cleanup", &self.auto_cleanup)
            .field("mutation_debounce", &self.mutation_debounce)
            .field("custom_equality", &self.equality.is_some())
            .finish()
    }
}

/// Immutable copy of the state at a point in time.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub state: Arc<Value>,
    pub timestamp: Timestamp,
}

struct History {
    current: Arc<Value>,
    undo: VecDeque<Arc<Value>>,
    redo: Vec<Arc<Value>>,
    snapshots: VecDeque<Snapshot>,
    /// Open tracked-mutation sessions (one per running transaction).
    mutation_depth: usize,
    disposed: bool,
}

/// Owner of the canonical state.
///
/// Two notification paths exist:
/// - [`StateManager::subscribe`] observers see every change, including
///   intermediate in-place writes made while a transaction runs.
/// - Selectors read from the [`Store`], which is only updated with committed
///   values, so they observe one consistent value per transaction.
pub struct StateManager {
    config: StateConfig,
    equals: StateEquality,
    history: Mutex<History>,
    /// Low-latency channel for direct subscribers.
    live: Signal<Arc<Value>>,
    store: Store,
    pending_notice: Mutex<Option<JoinHandle<()>>>,
    events: Arc<EventBus>,
}

impl StateManager {
    /// Create a manager holding a copy of `initial`.
    pub fn new(initial: Value, config: StateConfig) -> Arc<Self> {
        let equals = config.equality.clone().unwrap_or_else(deep_equal);
        let current = Arc::new(initial);
        let live = Signal::with_equality(
            Arc::clone(&current),
            Arc::new(|a: &Arc<Value>, b: &Arc<Value>| Arc::ptr_eq(a, b)),
        );
        let store = Store::new(Arc::clone(&current), Arc::clone(&equals));

        Arc::new(Self {
            config,
            equals,
            history: Mutex::new(History {
                current,
                undo: VecDeque::new(),
                redo: Vec::new(),
                snapshots: VecDeque::new(),
                mutation_depth: 0,
                disposed: false,
            }),
            live,
            store,
            pending_notice: Mutex::new(None),
            events: Arc::new(EventBus::new()),
        })
    }

    pub fn with_defaults(initial: Value) -> Arc<Self> {
        Self::new(initial, StateConfig::default())
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Event bus receiving lifecycle events of transactions bound to this manager.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// The reactive store backing selectors.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn equality(&self) -> StateEquality {
        Arc::clone(&self.equals)
    }

    /// Compare two values under the configured policy, with a pointer fast path.
    pub fn is_equal(&self, a: &Arc<Value>, b: &Arc<Value>) -> bool {
        Arc::ptr_eq(a, b) || (self.equals)(&**a, &**b)
    }

    // --- Reading & Writing ---

    /// Current state. The value is shared and immutable; mutate through
    /// [`StateManager::set_state`] or a [`Draft`].
    pub fn get_state(&self) -> Arc<Value> {
        Arc::clone(&self.history.lock().current)
    }

    /// Replace the state. Returns whether a change was detected.
    pub fn set_state(&self, next: Value) -> bool {
        self.replace(Arc::new(next))
    }

    /// Replace the state with a shared value.
    ///
    /// Outside a transaction a change pushes the previous value onto the undo
    /// stack and clears the redo stack. Inside one, history is left to the
    /// transaction's commit.
    pub fn replace(&self, next: Arc<Value>) -> bool {
        loop {
            // The equality policy is user code and may read the manager, so
            // compare against a snapshot and only swap if it is still current.
            let current = self.get_state();
            if self.is_disposed() || self.is_equal(&current, &next) {
                return false;
            }
            let in_session = {
                let mut history = self.history.lock();
                if history.disposed {
                    return false;
                }
                if !Arc::ptr_eq(&history.current, &current) {
                    continue;
                }
                let previous = std::mem::replace(&mut history.current, Arc::clone(&next));
                let in_session = history.mutation_depth > 0;
                if !in_session {
                    self.push_undo_locked(&mut history, previous);
                    history.redo.clear();
                }
                in_session
            };
            self.propagate(next, in_session);
            return true;
        }
    }

    /// Apply an in-place write produced by a [`Draft`].
    ///
    /// `apply` returns its output plus whether the value changed; unchanged
    /// writes never notify. It runs under the history lock and must not call
    /// back into the manager.
    pub(crate) fn mutate<R>(
        self: &Arc<Self>,
        apply: impl FnOnce(&mut Value) -> Result<(R, bool)>,
    ) -> Result<R> {
        let (output, in_session) = {
            let mut history = self.history.lock();
            if history.disposed {
                return Err(Error::Disposed);
            }
            let mut next = Arc::clone(&history.current);
            let (output, changed) = apply(Arc::make_mut(&mut next))?;
            if !changed {
                return Ok(output);
            }
            let previous = std::mem::replace(&mut history.current, next);
            let in_session = history.mutation_depth > 0;
            if !in_session {
                self.push_undo_locked(&mut history, previous);
                history.redo.clear();
            }
            (output, in_session)
        };

        self.schedule_notice();
        if !in_session {
            self.store.set(self.get_state());
        }
        Ok(output)
    }

    /// Tracking wrapper over the whole state.
    pub fn draft(self: &Arc<Self>) -> Draft {
        Draft::new(Arc::clone(self))
    }

    // --- Subscriptions ---

    /// Observe the state. The observer receives the current value
    /// immediately, then every subsequent change (including intermediate
    /// in-place writes during transactions).
    pub fn subscribe(
        &self,
        observer: impl Fn(&Arc<Value>) + Send + Sync + 'static,
    ) -> Subscription {
        let observer = Arc::new(observer);
        observer(&self.get_state());
        let forward = Arc::clone(&observer);
        self.live.subscribe(move |value| forward(value))
    }

    pub fn subscriber_count(&self) -> usize {
        self.live.subscriber_count()
    }

    // --- Tracked Mutation Sessions ---

    /// Open a session: writes update the state and notify direct subscribers
    /// but are held back from the store until commit.
    pub fn begin_tracked_mutation(&self) {
        self.history.lock().mutation_depth += 1;
    }

    pub fn end_tracked_mutation(&self) {
        let mut history = self.history.lock();
        history.mutation_depth = history.mutation_depth.saturating_sub(1);
    }

    pub fn in_tracked_mutation(&self) -> bool {
        self.history.lock().mutation_depth > 0
    }

    /// Reconcile the current value into the store once. Flushes any
    /// debounced notification. Returns whether selectors saw a change.
    pub fn commit_tracked_mutations(&self) -> bool {
        if let Some(task) = self.pending_notice.lock().take() {
            task.abort();
        }
        let current = self.get_state();
        self.live.set(Arc::clone(&current));
        self.store.set(current)
    }

    /// Cancel a debounced mutation notification. Returns whether one was pending.
    pub fn cancel_pending_notification(&self) -> bool {
        match self.pending_notice.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn schedule_notice(self: &Arc<Self>) {
        let delay = match self.config.mutation_debounce {
            Some(delay) if !delay.is_zero() => delay,
            _ => return self.notify_live(),
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return self.notify_live();
        };

        let manager = Arc::downgrade(self);
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = manager.upgrade() {
                manager.pending_notice.lock().take();
                manager.notify_live();
            }
        });
        if let Some(previous) = self.pending_notice.lock().replace(task) {
            previous.abort();
        }
    }

    fn notify_live(&self) {
        let current = self.get_state();
        self.live.set(current);
    }

    fn propagate(&self, value: Arc<Value>, in_session: bool) {
        self.live.set(Arc::clone(&value));
        if !in_session {
            self.store.set(value);
        }
    }

    // --- Undo / Redo ---

    /// Record `previous` as an undo entry for a committed change.
    pub(crate) fn record_commit(&self, previous: Arc<Value>) {
        let mut history = self.history.lock();
        self.push_undo_locked(&mut history, previous);
        history.redo.clear();
    }

    /// Step back one committed change. A no-op returning `false` when the
    /// undo stack is empty.
    pub fn undo(&self) -> bool {
        let (value, in_session) = {
            let mut history = self.history.lock();
            let Some(previous) = history.undo.pop_back() else {
                return false;
            };
            let current = std::mem::replace(&mut history.current, Arc::clone(&previous));
            history.redo.push(current);
            (previous, history.mutation_depth > 0)
        };
        tracing::debug!("undo applied");
        self.propagate(value, in_session);
        true
    }

    /// Re-apply the most recently undone change.
    pub fn redo(&self) -> bool {
        let (value, in_session) = {
            let mut history = self.history.lock();
            let Some(next) = history.redo.pop() else {
                return false;
            };
            let current = std::mem::replace(&mut history.current, Arc::clone(&next));
            self.push_undo_locked(&mut history, current);
            (next, history.mutation_depth > 0)
        };
        tracing::debug!("redo applied");
        self.propagate(value, in_session);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.history.lock().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.history.lock().redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.history.lock().undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.history.lock().redo.len()
    }

    /// Drop undo, redo and snapshot entries.
    pub fn clear_history(&self) {
        let mut history = self.history.lock();
        history.undo.clear();
        history.redo.clear();
        history.snapshots.clear();
    }

    fn push_undo_locked(&self, history: &mut History, previous: Arc<Value>) {
        history.undo.push_back(previous);
        if self.config.auto_cleanup {
            while history.undo.len() > self.config.max_undo_history {
                history.undo.pop_front();
            }
        }
    }

    // --- Snapshots ---

    /// Push a restore point. Returns the snapshot depth.
    pub fn create_snapshot(&self) -> usize {
        let mut history = self.history.lock();
        let snapshot = Snapshot {
            state: Arc::clone(&history.current),
            timestamp: Timestamp::now(),
        };
        history.snapshots.push_back(snapshot);
        if self.config.auto_cleanup {
            while history.snapshots.len() > self.config.max_snapshots {
                history.snapshots.pop_front();
            }
        }
        history.snapshots.len()
    }

    /// Pop the latest snapshot and restore it. Restoring does not create an
    /// undo entry. Returns `false` if there was no snapshot.
    pub fn rollback_to_last_snapshot(&self) -> bool {
        let (value, in_session) = {
            let mut history = self.history.lock();
            let Some(snapshot) = history.snapshots.pop_back() else {
                return false;
            };
            history.current = Arc::clone(&snapshot.state);
            (snapshot.state, history.mutation_depth > 0)
        };
        self.propagate(value, in_session);
        true
    }

    /// Pop the latest snapshot without restoring it.
    pub fn discard_last_snapshot(&self) -> bool {
        self.history.lock().snapshots.pop_back().is_some()
    }

    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.history.lock().snapshots.back().cloned()
    }

    pub fn snapshot_count(&self) -> usize {
        self.history.lock().snapshots.len()
    }

    // --- Selection ---

    /// Derive a value from the committed state.
    pub fn select<T>(&self, f: impl Fn(&Value) -> T + Send + Sync + 'static) -> Selector<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.select_with_equality(f, Arc::new(|a: &T, b: &T| a == b))
    }

    /// Like [`StateManager::select`] with a custom equality for the derived value.
    pub fn select_with_equality<T>(
        &self,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
        equals: EqualityFn<T>,
    ) -> Selector<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let source = self.store.signal_handle();
        let derived = Derived::with_equality(
            move |t| t.with(&source, |state: &Arc<Value>| f(&**state)),
            equals,
        );
        Selector::new(derived)
    }

    /// Select a top-level property (`Null` when absent).
    pub fn select_property(&self, key: &str) -> Selector<Value> {
        let key = key.to_string();
        self.select(move |state| state.get(&key).cloned().unwrap_or(Value::Null))
    }

    /// Select a dotted path such as `"user.address.city"` (`Null` when absent).
    pub fn select_path(&self, dotted: &str) -> Selector<Value> {
        let segments = path::parse(dotted);
        self.select(move |state| path::get(state, &segments).cloned().unwrap_or(Value::Null))
    }

    /// Combine several selectors into one derived value.
    ///
    /// Inputs that change in the same write are seen together: `f` runs once
    /// per write, never with a mix of old and new values.
    pub fn combine<T, R>(
        &self,
        selectors: &[Selector<T>],
        f: impl Fn(&[T]) -> R + Send + Sync + 'static,
    ) -> Selector<R>
    where
        T: Clone + Send + Sync + 'static,
        R: Clone + PartialEq + Send + Sync + 'static,
    {
        self.combine_with_equality(selectors, f, Arc::new(|a: &R, b: &R| a == b))
    }

    /// Like [`StateManager::combine`] with a custom equality for the result.
    pub fn combine_with_equality<T, R>(
        &self,
        selectors: &[Selector<T>],
        f: impl Fn(&[T]) -> R + Send + Sync + 'static,
        equals: EqualityFn<R>,
    ) -> Selector<R>
    where
        T: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let sources: Vec<Selector<T>> = selectors.to_vec();
        let derived = Derived::with_equality(
            move |t| {
                let values: Vec<T> = sources.iter().map(|s| t.get(s)).collect();
                f(&values)
            },
            equals,
        );
        Selector::new(derived)
    }

    // --- Persistence Hooks ---

    /// Capture the current state under `key` for an external persistence layer.
    pub fn persist(&self, key: &str) -> PersistedSnapshot {
        PersistedSnapshot {
            key: key.to_string(),
            state: (*self.get_state()).clone(),
            timestamp: Timestamp::now(),
        }
    }

    /// Restore a persisted snapshot as a regular, undoable state change.
    pub fn restore(&self, snapshot: PersistedSnapshot) -> bool {
        self.set_state(snapshot.state)
    }

    // --- Lifecycle ---

    /// Clear every stack and release all subscriptions. Subsequent writes are ignored.
    pub fn dispose(&self) {
        self.cancel_pending_notification();
        {
            let mut history = self.history.lock();
            history.disposed = true;
            history.undo.clear();
            history.redo.clear();
            history.snapshots.clear();
        }
        self.live.clear_subscribers();
        self.store.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.history.lock().disposed
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.history.lock();
        f.debug_struct("StateManager")
            .field("undo", &history.undo.len())
            .field("redo", &history.redo.len())
            .field("snapshots", &history.snapshots.len())
            .field("mutation_depth", &history.mutation_depth)
            .finish()
    }
}
