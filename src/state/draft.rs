//! Mutation-tracking view over the state.

use super::{path, StateManager};
use crate::error::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct DraftNode {
    manager: Arc<StateManager>,
    prefix: Vec<String>,
    /// Nested views, created on first access and reused afterwards.
    children: Mutex<HashMap<String, Arc<DraftNode>>>,
}

/// A writable view over (part of) the managed state.
///
/// Every write is applied to the manager's canonical value immediately.
/// Writes that leave the stored value unchanged are dropped without
/// notifying anyone. Nested views obtained with [`Draft::child`] are cached,
/// so asking for the same key twice yields the same view.
///
/// ```ignore
/// let draft = manager.draft();
/// draft.update("counter", |v| *v = json!(v.as_i64().unwrap_or(0) + 5))?;
/// draft.child("user").set("name", json!("ada"))?;
/// ```
#[derive(Clone)]
pub struct Draft {
    node: Arc<DraftNode>,
}

impl Draft {
    pub(crate) fn new(manager: Arc<StateManager>) -> Self {
        Self {
            node: Arc::new(DraftNode {
                manager,
                prefix: Vec::new(),
                children: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn manager(&self) -> &Arc<StateManager> {
        &self.node.manager
    }

    /// Dotted path of this view relative to the root.
    pub fn path(&self) -> String {
        path::join(&self.node.prefix)
    }

    /// Nested view under `key` (dotted keys descend several levels).
    pub fn child(&self, key: &str) -> Draft {
        let mut node = Arc::clone(&self.node);
        for segment in path::parse(key) {
            let next = {
                let mut children = node.children.lock();
                Arc::clone(children.entry(segment.clone()).or_insert_with(|| {
                    let mut prefix = node.prefix.clone();
                    prefix.push(segment);
                    Arc::new(DraftNode {
                        manager: Arc::clone(&node.manager),
                        prefix,
                        children: Mutex::new(HashMap::new()),
                    })
                }))
            };
            node = next;
        }
        Draft { node }
    }

    /// Whether two drafts are the same cached view.
    pub fn same_view(&self, other: &Draft) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Value at this view, if present.
    pub fn value(&self) -> Option<Value> {
        self.get("")
    }

    /// Value at `key` relative to this view.
    pub fn get(&self, key: &str) -> Option<Value> {
        let state = self.node.manager.get_state();
        path::get(&state, &self.resolve(key)).cloned()
    }

    /// Write `value` at `key`. The parent must exist. Returns whether the
    /// state changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        self.write(key, value.into(), false)
    }

    /// Write `value` at `key`, creating missing intermediate objects.
    pub fn define(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        self.write(key, value.into(), true)
    }

    /// Replace the value of this view.
    pub fn replace(&self, value: impl Into<Value>) -> Result<bool> {
        self.write("", value.into(), true)
    }

    /// Delete `key`, returning the removed value.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        let segments = self.resolve(key);
        self.node.manager.mutate(|state| {
            let removed = path::remove(state, &segments)?;
            let changed = removed.is_some();
            Ok((removed, changed))
        })
    }

    /// Modify the value at `key` in place (`Null` if absent).
    ///
    /// `f` runs without holding the manager's lock, so it may read the state
    /// through this or any other draft.
    pub fn update(&self, key: &str, f: impl FnOnce(&mut Value)) -> Result<bool> {
        let mut value = self.get(key).unwrap_or(Value::Null);
        f(&mut value);
        self.write(key, value, true)
    }

    fn write(&self, key: &str, value: Value, create: bool) -> Result<bool> {
        let segments = self.resolve(key);
        self.node.manager.mutate(|state| {
            let changed = path::set(state, &segments, value, create)?;
            Ok((changed, changed))
        })
    }

    fn resolve(&self, key: &str) -> Vec<String> {
        let mut segments = self.node.prefix.clone();
        segments.extend(path::parse(key));
        segments
    }
}

impl fmt::Debug for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft").field("path", &self.path()).finish()
    }
}
