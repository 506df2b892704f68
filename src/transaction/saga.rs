//! One saga run: snapshot, middleware chain, sequential steps, then commit
//! or rollback.

use super::{CompensationPolicy, RollbackEngine, Step, StepExecutor};
use crate::error::{Error, Result};
use crate::events::{EventBus, TransactionEvent};
use crate::middleware::{MiddlewareChain, MiddlewareContext};
use crate::state::StateManager;
use crate::types::{BoxFuture, StateEquality, Timestamp};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Created,
    Running,
    Succeeded,
    FailedAndRolledBack,
    FailedNoRollback,
}

/// Per-transaction configuration.
#[derive(Clone)]
pub struct TransactionConfig {
    /// Compensate and restore the snapshot when a step fails.
    /// Default: true
    pub auto_rollback: bool,

    /// Equality used to decide whether a run changed the state. Falls back to
    /// the manager's policy.
    pub equality: Option<StateEquality>,

    /// Default: [`CompensationPolicy::FailFast`]
    pub compensation_policy: CompensationPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            equality: None,
            compensation_policy: CompensationPolicy::default(),
        }
    }
}

impl fmt::Debug for TransactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionConfig")
            .field("auto_rollback", &self.auto_rollback)
            .field("custom_equality", &self.equality.is_some())
            .field("compensation_policy", &self.compensation_policy)
            .finish()
    }
}

/// Closes a tracked-mutation session when dropped, including when the run
/// future is dropped mid-flight.
struct Session<'a> {
    state: &'a StateManager,
}

impl<'a> Session<'a> {
    fn begin(state: &'a StateManager) -> Self {
        state.begin_tracked_mutation();
        Self { state }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.state.end_tracked_mutation();
    }
}

/// Named, ordered sequence of steps bound to one [`StateManager`].
///
/// Built with [`super::TransactionBuilder`].
pub struct Transaction {
    name: String,
    state: Arc<StateManager>,
    steps: Arc<Vec<Step>>,
    middleware: MiddlewareChain,
    config: TransactionConfig,
    executor: StepExecutor,
    rollback: RollbackEngine,
    events: Arc<EventBus>,
    executed: Arc<Mutex<Vec<Step>>>,
    status: Mutex<TransactionStatus>,
}

impl Transaction {
    pub(crate) fn new(
        name: String,
        state: Arc<StateManager>,
        steps: Vec<Step>,
        middleware: MiddlewareChain,
        config: TransactionConfig,
    ) -> Self {
        let events = state.events();
        Self {
            name,
            steps: Arc::new(steps),
            middleware,
            executor: StepExecutor::new(Arc::clone(&events)),
            rollback: RollbackEngine::new(Arc::clone(&events), config.compensation_policy),
            events,
            config,
            state,
            executed: Arc::new(Mutex::new(Vec::new())),
            status: Mutex::new(TransactionStatus::Created),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Names of the steps that completed during the latest run.
    pub fn executed_steps(&self) -> Vec<String> {
        self.executed.lock().iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every step in order inside the middleware chain.
    ///
    /// On success the run is committed as one undo entry (none if the state
    /// ends up equal to where it started). On failure, with auto-rollback
    /// the executed steps are compensated in reverse and the state is
    /// restored; without it the completed effects are kept.
    pub async fn run(&self, payload: Value) -> Result<()> {
        self.executed.lock().clear();
        *self.status.lock() = TransactionStatus::Running;
        let started = Instant::now();

        let initial = self.state.get_state();
        self.state.create_snapshot();
        tracing::info!(transaction = %self.name, steps = self.steps.len(), "transaction started");
        self.events.emit(TransactionEvent::TransactionStart {
            transaction_name: self.name.clone(),
            payload: payload.clone(),
            timestamp: Timestamp::now(),
        });

        let session = Session::begin(&self.state);
        let ctx = MiddlewareContext::new(self.name.clone(), payload.clone(), Arc::clone(&self.state));
        let outcome = self.middleware.execute(ctx, self.core(&payload)).await;

        let err = match outcome {
            Ok(()) => {
                self.commit(initial, session);
                self.state.discard_last_snapshot();
                *self.status.lock() = TransactionStatus::Succeeded;
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(transaction = %self.name, duration_ms, "transaction committed");
                self.events.emit(TransactionEvent::TransactionSuccess {
                    transaction_name: self.name.clone(),
                    payload,
                    timestamp: Timestamp::now(),
                    duration_ms,
                });
                return Ok(());
            }
            Err(err) => err,
        };

        self.events.emit(TransactionEvent::TransactionFail {
            transaction_name: self.name.clone(),
            payload: payload.clone(),
            timestamp: Timestamp::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: err.to_string(),
        });

        if !self.config.auto_rollback {
            self.state.discard_last_snapshot();
            self.commit(initial, session);
            *self.status.lock() = TransactionStatus::FailedNoRollback;
            tracing::warn!(transaction = %self.name, error = %err, "transaction failed, rollback disabled");
            return Err(Error::TransactionFailed {
                transaction: self.name.clone(),
                source: Box::new(err),
            });
        }

        let executed = self.executed.lock().clone();
        let rolled_back = self
            .rollback
            .rollback_transaction(&self.name, &executed, &self.state.draft(), &payload, &err)
            .await;
        self.commit(initial, session);
        *self.status.lock() = TransactionStatus::FailedAndRolledBack;

        match rolled_back {
            Ok(()) => Err(Error::TransactionRolledBack {
                transaction: self.name.clone(),
                source: Box::new(err),
            }),
            Err(compensation) => {
                tracing::error!(transaction = %self.name, error = %compensation, "rollback incomplete");
                Err(Error::RollbackFailed {
                    transaction: self.name.clone(),
                    cause: Box::new(err),
                    source: Box::new(compensation),
                })
            }
        }
    }

    /// Compensate the steps executed by the latest failed run.
    ///
    /// Only available with auto-rollback disabled. The state is not restored
    /// from a snapshot; compensations are the only undo applied. The result
    /// is committed as one undo entry.
    pub async fn rollback(&self, payload: Value) -> Result<()> {
        if self.config.auto_rollback {
            return Err(Error::ManualRollbackUnavailable {
                transaction: self.name.clone(),
            });
        }

        let executed = std::mem::take(&mut *self.executed.lock());
        let initial = self.state.get_state();
        let session = Session::begin(&self.state);
        let result = self
            .rollback
            .compensate_transaction(&self.name, &executed, &self.state.draft(), &payload)
            .await;
        self.commit(initial, session);
        result
    }

    /// Build the innermost continuation: every step in order.
    fn core(&self, payload: &Value) -> impl FnOnce() -> BoxFuture<Result<()>> + Send + 'static {
        let steps = Arc::clone(&self.steps);
        let executed = Arc::clone(&self.executed);
        let executor = self.executor.clone();
        let draft = self.state.draft();
        let payload = payload.clone();
        move || -> BoxFuture<Result<()>> {
            Box::pin(async move {
                for step in steps.iter() {
                    executor.execute_step(step, &draft, &payload).await?;
                    executed.lock().push(step.clone());
                }
                Ok::<(), Error>(())
            })
        }
    }

    /// Close the session, record one undo entry if the state changed since
    /// `initial`, then publish the value to selectors once.
    fn commit(&self, initial: Arc<Value>, session: Session<'_>) {
        drop(session);
        let current = self.state.get_state();
        let unchanged = Arc::ptr_eq(&initial, &current)
            || match &self.config.equality {
                Some(equals) => equals(&*initial, &*current),
                None => self.state.is_equal(&initial, &current),
            };
        if !unchanged {
            self.state.record_commit(initial);
        }
        self.state.commit_tracked_mutations();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("middleware", &self.middleware.len())
            .field("status", &self.status())
            .field("config", &self.config)
            .finish()
    }
}
