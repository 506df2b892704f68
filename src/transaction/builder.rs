//! Fluent construction of transactions.

use super::{CompensationPolicy, Step, Transaction, TransactionConfig};
use crate::error::Result;
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareContext, Next};
use crate::state::StateManager;
use crate::types::StateEquality;
use std::future::Future;
use std::sync::Arc;

/// Builder for a [`Transaction`].
///
/// Configuration calls may come before, after or between step
/// registrations; only the final configuration applies.
///
/// ```ignore
/// let tx = TransactionBuilder::new("increment", &manager)
///     .step(Step::from_fn("add", |draft, payload| {
///         draft.update("counter", |v| *v = json!(v.as_i64().unwrap_or(0) + 5))?;
///         Ok(())
///     }))
///     .auto_rollback(false)
///     .build();
/// ```
pub struct TransactionBuilder {
    name: String,
    state: Arc<StateManager>,
    steps: Vec<Step>,
    middleware: MiddlewareChain,
    config: TransactionConfig,
}

impl TransactionBuilder {
    pub fn new(name: impl Into<String>, state: &Arc<StateManager>) -> Self {
        Self {
            name: name.into(),
            state: Arc::clone(state),
            steps: Vec::new(),
            middleware: MiddlewareChain::new(),
            config: TransactionConfig::default(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Replace the whole configuration.
    pub fn configure(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn auto_rollback(mut self, enabled: bool) -> Self {
        self.config.auto_rollback = enabled;
        self
    }

    pub fn equality(mut self, equality: StateEquality) -> Self {
        self.config.equality = Some(equality);
        self
    }

    pub fn compensation_policy(mut self, policy: CompensationPolicy) -> Self {
        self.config.compensation_policy = policy;
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn middleware_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(MiddlewareContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.middleware.push_fn(f);
        self
    }

    pub fn build(self) -> Transaction {
        Transaction::new(self.name, self.state, self.steps, self.middleware, self.config)
    }
}
