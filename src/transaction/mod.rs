//! Saga-style transactions over a [`crate::state::StateManager`].
//!
//! A transaction is a named, ordered list of [`Step`]s. Running it:
//! 1. snapshots the state and emits `transaction:start`
//! 2. enters the middleware chain, whose core runs the steps in order through
//!    the [`StepExecutor`] (retry, timeout)
//! 3. commits one undo entry on success, or compensates the executed steps
//!    in reverse and restores the snapshot on failure ([`RollbackEngine`])
//!
//! The [`Composer`] layers sequential, parallel, conditional and fallback
//! policies over whole transactions.

mod builder;
mod composer;
mod executor;
mod rollback;
mod saga;
mod step;

pub use builder::TransactionBuilder;
pub use composer::{Composer, CompositionReport, ParallelOptions, Predicate};
pub use executor::StepExecutor;
pub use rollback::{CompensationPolicy, RollbackEngine};
pub use saga::{Transaction, TransactionConfig, TransactionStatus};
pub use step::{Step, StepFn};
