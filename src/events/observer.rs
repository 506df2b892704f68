//! Observer hooks for external observability.

use super::types::TransactionEvent;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives every lifecycle event synchronously.
pub trait TransactionObserver: Send + Sync + 'static {
    fn on_event(&self, event: &TransactionEvent);
}

/// No-op observer
pub struct NoOpObserver;

impl TransactionObserver for NoOpObserver {
    fn on_event(&self, _event: &TransactionEvent) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl TransactionObserver for TracingObserver {
    fn on_event(&self, event: &TransactionEvent) {
        match event {
            TransactionEvent::TransactionStart { transaction_name, .. } => {
                tracing::info!(transaction = %transaction_name, "Transaction started");
            }
            TransactionEvent::TransactionSuccess { transaction_name, duration_ms, .. } => {
                tracing::info!(transaction = %transaction_name, duration_ms = *duration_ms, "Transaction committed");
            }
            TransactionEvent::TransactionFail { transaction_name, duration_ms, error, .. } => {
                tracing::error!(transaction = %transaction_name, duration_ms = *duration_ms, error = %error, "Transaction failed");
            }
            TransactionEvent::TransactionRollback { transaction_name, error, .. } => {
                tracing::warn!(transaction = %transaction_name, error = %error, "Transaction rolling back");
            }
            TransactionEvent::StepStart { step_name, .. } => {
                tracing::debug!(step = %step_name, "Step started");
            }
            TransactionEvent::StepSuccess { step_name, duration_ms, .. } => {
                tracing::debug!(step = %step_name, duration_ms = *duration_ms, "Step completed");
            }
            TransactionEvent::StepRetry { step_name, attempt, last_error, .. } => {
                tracing::warn!(step = %step_name, attempt = *attempt, error = %last_error, "Step retrying");
            }
            TransactionEvent::StepRollback { step_name, .. } => {
                tracing::info!(step = %step_name, "Compensation started");
            }
        }
    }
}

/// Counts lifecycle events.
pub struct StatsObserver {
    pub transactions_started: AtomicU64,
    pub transactions_succeeded: AtomicU64,
    pub transactions_failed: AtomicU64,
    pub transactions_rolled_back: AtomicU64,
    pub steps_started: AtomicU64,
    pub steps_succeeded: AtomicU64,
    pub step_retries: AtomicU64,
    pub compensations: AtomicU64,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self {
            transactions_started: AtomicU64::new(0),
            transactions_succeeded: AtomicU64::new(0),
            transactions_failed: AtomicU64::new(0),
            transactions_rolled_back: AtomicU64::new(0),
            steps_started: AtomicU64::new(0),
            steps_succeeded: AtomicU64::new(0),
            step_retries: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_succeeded: self.transactions_succeeded.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            steps_started: self.steps_started.load(Ordering::Relaxed),
            steps_succeeded: self.steps_succeeded.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatsObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionObserver for StatsObserver {
    fn on_event(&self, event: &TransactionEvent) {
        let counter = match event {
            TransactionEvent::TransactionStart { .. } => &self.transactions_started,
            TransactionEvent::TransactionSuccess { .. } => &self.transactions_succeeded,
            TransactionEvent::TransactionFail { .. } => &self.transactions_failed,
            TransactionEvent::TransactionRollback { .. } => &self.transactions_rolled_back,
            TransactionEvent::StepStart { .. } => &self.steps_started,
            TransactionEvent::StepSuccess { .. } => &self.steps_succeeded,
            TransactionEvent::StepRetry { .. } => &self.step_retries,
            TransactionEvent::StepRollback { .. } => &self.compensations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub transactions_started: u64,
    pub transactions_succeeded: u64,
    pub transactions_failed: u64,
    pub transactions_rolled_back: u64,
    pub steps_started: u64,
    pub steps_succeeded: u64,
    pub step_retries: u64,
    pub compensations: u64,
}
