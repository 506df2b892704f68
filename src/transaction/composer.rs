//! Orchestration policies over whole transactions.

use super::Transaction;
use crate::error::Result;
use crate::state::StateManager;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;

/// Gate for conditional stages, evaluated against `(state, payload)`.
pub type Predicate = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelOptions {
    /// Keep going when a transaction of the group fails.
    /// Default: false
    pub continue_on_error: bool,
}

enum Stage {
    Sequential(Transaction),
    Parallel {
        group: Vec<Transaction>,
        options: ParallelOptions,
    },
    Conditional {
        predicate: Predicate,
        transaction: Transaction,
    },
    Fallback {
        primary: Transaction,
        fallback: Transaction,
    },
}

/// Outcome of a composed run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositionReport {
    pub completed: Vec<String>,
    /// Conditional stages whose predicate was false.
    pub skipped: Vec<String>,
    /// `(transaction, error)` for failures tolerated by `continue_on_error`.
    pub failed: Vec<(String, String)>,
    /// Primary transactions that were replaced by their fallback.
    pub fallbacks_used: Vec<String>,
}

/// Runs transactions in stages.
///
/// Each transaction keeps its own rollback semantics; the composer only
/// decides what runs next.
pub struct Composer {
    state: Arc<StateManager>,
    stages: Vec<Stage>,
}

impl Composer {
    pub fn new(state: &Arc<StateManager>) -> Self {
        Self {
            state: Arc::clone(state),
            stages: Vec::new(),
        }
    }

    pub fn then(mut self, transaction: Transaction) -> Self {
        self.stages.push(Stage::Sequential(transaction));
        self
    }

    /// Run `group` concurrently. Every member runs to completion; unless
    /// `continue_on_error` is set, the first failure then stops the
    /// composition.
    pub fn parallel(mut self, group: Vec<Transaction>, options: ParallelOptions) -> Self {
        self.stages.push(Stage::Parallel { group, options });
        self
    }

    pub fn when(
        mut self,
        predicate: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
        transaction: Transaction,
    ) -> Self {
        self.stages.push(Stage::Conditional {
            predicate: Arc::new(predicate),
            transaction,
        });
        self
    }

    /// Run `fallback` if `primary` fails.
    pub fn with_fallback(mut self, primary: Transaction, fallback: Transaction) -> Self {
        self.stages.push(Stage::Fallback { primary, fallback });
        self
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub async fn run(&self, payload: Value) -> Result<CompositionReport> {
        let mut report = CompositionReport::default();
        for stage in &self.stages {
            match stage {
                Stage::Sequential(transaction) => {
                    transaction.run(payload.clone()).await?;
                    report.completed.push(transaction.name().to_string());
                }
                Stage::Parallel { group, options } => {
                    let outcomes = join_all(group.iter().map(|tx| tx.run(payload.clone()))).await;
                    let mut first_error = None;
                    for (transaction, outcome) in group.iter().zip(outcomes) {
                        match outcome {
                            Ok(()) => report.completed.push(transaction.name().to_string()),
                            Err(err) if options.continue_on_error => {
                                tracing::warn!(transaction = %transaction.name(), error = %err, "parallel member failed, continuing");
                                report.failed.push((transaction.name().to_string(), err.to_string()));
                            }
                            Err(err) => {
                                first_error.get_or_insert(err);
                            }
                        }
                    }
                    if let Some(err) = first_error {
                        return Err(err);
                    }
                }
                Stage::Conditional {
                    predicate,
                    transaction,
                } => {
                    let state = self.state.get_state();
                    if predicate(state.as_ref(), &payload) {
                        transaction.run(payload.clone()).await?;
                        report.completed.push(transaction.name().to_string());
                    } else {
                        tracing::debug!(transaction = %transaction.name(), "condition false, skipping");
                        report.skipped.push(transaction.name().to_string());
                    }
                }
                Stage::Fallback { primary, fallback } => {
                    match primary.run(payload.clone()).await {
                        Ok(()) => report.completed.push(primary.name().to_string()),
                        Err(err) => {
                            tracing::warn!(
                                transaction = %primary.name(),
                                fallback = %fallback.name(),
                                error = %err,
                                "primary failed, running fallback"
                            );
                            fallback.run(payload.clone()).await?;
                            report.fallbacks_used.push(primary.name().to_string());
                            report.completed.push(fallback.name().to_string());
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}
