//! State management: canonical value, history, snapshots and selection.
//!
//! The [`StateManager`] owns one structured value. Every committed change
//! pushes the previous value onto a bounded undo stack; snapshots form a
//! separate bounded stack used as rollback restore points. In-place writes go
//! through a [`Draft`], which detects value-changing writes and reports them
//! to the manager.

mod draft;
mod manager;
pub mod path;
mod selector;

pub use draft::Draft;
pub use manager::{Snapshot, StateConfig, StateManager};
pub use selector::Selector;
