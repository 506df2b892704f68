//! Selector handles handed to UI and other read-side collaborators.

use crate::signals::{Derived, Readable, Signal, Subscription};

/// Read handle over a value derived from the state.
///
/// Selectors only observe committed state: in-place writes made during a
/// transaction become visible once, at commit.
pub struct Selector<T> {
    derived: Derived<T>,
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            derived: self.derived.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Selector<T> {
    pub(crate) fn new(derived: Derived<T>) -> Self {
        Self { derived }
    }

    pub fn get(&self) -> T {
        self.derived.get()
    }

    /// Alias of [`Selector::get`].
    pub fn value(&self) -> T {
        self.derived.get()
    }

    /// Observe subsequent changes. The current value is not replayed.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.derived.subscribe(observer)
    }
}

impl<T> Readable<T> for Selector<T> {
    fn signal(&self) -> &Signal<T> {
        self.derived.signal()
    }
}
