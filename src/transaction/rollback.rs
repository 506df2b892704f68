//! Compensation of executed steps.

use super::Step;
use crate::error::{Error, Result};
use crate::events::{EventBus, TransactionEvent};
use crate::state::Draft;
use crate::types::Timestamp;
use serde_json::Value;
use std::sync::Arc;

/// What to do when a compensation itself fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompensationPolicy {
    /// Stop at the first failing compensation and leave the state as is.
    #[default]
    FailFast,
    /// Run every compensation, restore the snapshot, then report all failures.
    ContinueOnError,
}

#[derive(Clone)]
pub struct RollbackEngine {
    events: Arc<EventBus>,
    policy: CompensationPolicy,
}

impl RollbackEngine {
    pub fn new(events: Arc<EventBus>, policy: CompensationPolicy) -> Self {
        Self { events, policy }
    }

    pub fn policy(&self) -> CompensationPolicy {
        self.policy
    }

    /// Run the compensation of `step`, if it has one.
    pub async fn compensate_step(&self, step: &Step, draft: &Draft, payload: &Value) -> Result<()> {
        let Some(compensate) = step.compensation() else {
            return Ok(());
        };

        self.events.emit(TransactionEvent::StepRollback {
            step_name: step.name().to_string(),
            payload: payload.clone(),
            timestamp: Timestamp::now(),
        });
        tracing::debug!(step = %step.name(), "running compensation");

        compensate(draft.clone(), payload.clone())
            .await
            .map_err(|source| Error::CompensationFailed {
                step: step.name().to_string(),
                source,
            })
    }

    /// Compensate `executed` in reverse order without touching snapshots.
    pub async fn compensate_all(
        &self,
        transaction: &str,
        executed: &[Step],
        draft: &Draft,
        payload: &Value,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for step in executed.iter().rev() {
            let Err(err) = self.compensate_step(step, draft, payload).await else {
                continue;
            };
            match self.policy {
                CompensationPolicy::FailFast => return Err(err),
                CompensationPolicy::ContinueOnError => {
                    tracing::warn!(transaction, step = %step.name(), error = %err, "compensation failed, continuing");
                    failures.push(err.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CompensationsFailed {
                transaction: transaction.to_string(),
                failures,
            })
        }
    }

    /// Compensate `executed` in reverse order, then restore the
    /// pre-transaction snapshot.
    ///
    /// Under [`CompensationPolicy::FailFast`] a failing compensation aborts
    /// the rest and the snapshot is discarded without being restored.
    pub async fn rollback_steps(
        &self,
        transaction: &str,
        executed: &[Step],
        draft: &Draft,
        payload: &Value,
    ) -> Result<()> {
        let state = draft.manager();
        match self.compensate_all(transaction, executed, draft, payload).await {
            Ok(()) => {
                state.rollback_to_last_snapshot();
                Ok(())
            }
            Err(err @ Error::CompensationsFailed { .. }) => {
                state.rollback_to_last_snapshot();
                Err(err)
            }
            Err(err) => {
                state.discard_last_snapshot();
                Err(err)
            }
        }
    }

    /// [`RollbackEngine::rollback_steps`] announced by one
    /// `transaction:rollback` event.
    pub async fn rollback_transaction(
        &self,
        transaction: &str,
        executed: &[Step],
        draft: &Draft,
        payload: &Value,
        cause: &Error,
    ) -> Result<()> {
        self.events.emit(TransactionEvent::TransactionRollback {
            transaction_name: transaction.to_string(),
            payload: payload.clone(),
            timestamp: Timestamp::now(),
            error: cause.to_string(),
        });
        tracing::warn!(transaction, steps = executed.len(), error = %cause, "rolling back");
        self.rollback_steps(transaction, executed, draft, payload).await
    }

    /// Compensate `executed` on demand, announced by one
    /// `transaction:rollback` event. No snapshot is restored.
    pub async fn compensate_transaction(
        &self,
        transaction: &str,
        executed: &[Step],
        draft: &Draft,
        payload: &Value,
    ) -> Result<()> {
        self.events.emit(TransactionEvent::TransactionRollback {
            transaction_name: transaction.to_string(),
            payload: payload.clone(),
            timestamp: Timestamp::now(),
            error: "manual rollback".to_string(),
        });
        tracing::info!(transaction, steps = executed.len(), "manual rollback");
        self.compensate_all(transaction, executed, draft, payload).await
    }
}
