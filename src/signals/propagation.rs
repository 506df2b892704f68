//! Two-phase change propagation.
//!
//! A write first recomputes every affected derivation in ascending height
//! order, where a derivation sits one level above its highest dependency.
//! Observers run only once the graph has settled. A derivation that reads
//! several sources changing in the same write therefore recomputes once,
//! after all of them, and never publishes a mix of old and new inputs.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// A node that recomputes when one of its dependencies changes.
pub(crate) trait Dependent: Send + Sync {
    fn node_id(&self) -> u64;
    fn height(&self) -> usize;
    fn recompute(self: Arc<Self>, propagation: &mut Propagation);
}

type Effect = Box<dyn FnOnce() + Send>;

/// Work collected while a write travels through the graph.
#[derive(Default)]
pub(crate) struct Propagation {
    /// Keyed by `(height, node)` so each node runs once, lowest first.
    pending: BTreeMap<(usize, u64), Weak<dyn Dependent>>,
    effects: Vec<Effect>,
}

impl Propagation {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, dependent: &Weak<dyn Dependent>) {
        if let Some(node) = dependent.upgrade() {
            self.pending
                .entry((node.height(), node.node_id()))
                .or_insert_with(|| Weak::clone(dependent));
        }
    }

    /// Queue an observer call until every recomputation is done.
    pub(crate) fn defer(&mut self, effect: impl FnOnce() + Send + 'static) {
        self.effects.push(Box::new(effect));
    }

    pub(crate) fn run(mut self) {
        while let Some((_, dependent)) = self.pending.pop_first() {
            if let Some(node) = dependent.upgrade() {
                node.recompute(&mut self);
            }
        }
        for effect in self.effects {
            effect();
        }
    }
}
