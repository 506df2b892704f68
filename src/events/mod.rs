//! Lifecycle events for observability collaborators.
//!
//! Transactions emit a closed set of records:
//! - `transaction:start|success|fail|rollback`
//! - `step:start|success|retry|rollback`
//!
//! They can be consumed two ways:
//! - bounded channel streams ([`EventBus::subscribe`]), dropped when they fall behind
//! - synchronous [`TransactionObserver`]s
//!
//! # Example
//!
//! ```ignore
//! let events = manager.events();
//! let stream = events.subscribe(EventStreamConfig {
//!     filter: EventFilter::steps(),
//!     ..Default::default()
//! });
//! transaction.run(json!({})).await?;
//! for event in stream.drain() {
//!     println!("{}: {}", event.event_type(), event.name());
//! }
//! ```

mod bus;
mod observer;
mod types;

pub use bus::EventBus;
pub use observer::{NoOpObserver, StatsObserver, StatsSnapshot, TracingObserver, TransactionObserver};
pub use types::{EventFilter, EventStream, EventStreamConfig, TransactionEvent};
