//! # statesaga
//!
//! A transactional state engine: one shared structured value mutated through
//! named saga transactions with compensation-based rollback, bounded
//! undo/redo history, and a push-based reactive graph that keeps selectors
//! in sync.
//!
//! ## Core Concepts
//!
//! - **State**: a `serde_json::Value` owned by a [`StateManager`], with undo/redo and snapshots
//! - **Drafts**: writable views whose value-changing writes are tracked
//! - **Transactions**: ordered steps with retry, timeout and compensation
//! - **Middleware**: onion-style wrappers around a transaction run
//! - **Signals**: value cells and derived cells behind selectors
//!
//! ## Example
//!
//! ```ignore
//! use statesaga::{StateManager, Step, TransactionBuilder};
//! use serde_json::json;
//!
//! let manager = StateManager::with_defaults(json!({"counter": 0}));
//! let counter = manager.select_property("counter");
//!
//! let tx = TransactionBuilder::new("increment", &manager)
//!     .step(
//!         Step::from_fn("add-five", |draft, _| {
//!             draft.update("counter", |v| *v = json!(v.as_i64().unwrap_or(0) + 5))?;
//!             Ok(())
//!         })
//!         .compensate_fn(|draft, _| {
//!             draft.update("counter", |v| *v = json!(v.as_i64().unwrap_or(0) - 5))?;
//!             Ok(())
//!         }),
//!     )
//!     .build();
//!
//! tx.run(json!({})).await?;
//! assert_eq!(counter.get(), json!(5));
//! manager.undo();
//! ```

pub mod error;
pub mod events;
pub mod middleware;
pub mod persist;
pub mod signals;
pub mod state;
pub mod store;
pub mod transaction;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use events::{
    EventBus, EventFilter, EventStream, EventStreamConfig, NoOpObserver, StatsObserver,
    StatsSnapshot, TracingObserver, TransactionEvent, TransactionObserver,
};
pub use middleware::{from_fn, Middleware, MiddlewareChain, MiddlewareContext, Next};
pub use persist::PersistedSnapshot;
pub use signals::{Derived, Readable, Signal, Subscription, Tracker};
pub use state::{Draft, Selector, Snapshot, StateConfig, StateManager};
pub use store::{KeyWatch, Store};
pub use transaction::{
    CompensationPolicy, Composer, CompositionReport, ParallelOptions, Step, Transaction,
    TransactionBuilder, TransactionConfig, TransactionStatus,
};
pub use types::*;
