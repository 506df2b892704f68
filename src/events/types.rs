//! Lifecycle event types.

use crate::types::{SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle record emitted by transactions and their steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionEvent {
    // --- Transaction Events ---
    #[serde(rename = "transaction:start", rename_all = "camelCase")]
    TransactionStart {
        transaction_name: String,
        payload: Value,
        timestamp: Timestamp,
    },

    #[serde(rename = "transaction:success", rename_all = "camelCase")]
    TransactionSuccess {
        transaction_name: String,
        payload: Value,
        timestamp: Timestamp,
        duration_ms: u64,
    },

    #[serde(rename = "transaction:fail", rename_all = "camelCase")]
    TransactionFail {
        transaction_name: String,
        payload: Value,
        timestamp: Timestamp,
        duration_ms: u64,
        error: String,
    },

    #[serde(rename = "transaction:rollback", rename_all = "camelCase")]
    TransactionRollback {
        transaction_name: String,
        payload: Value,
        timestamp: Timestamp,
        error: String,
    },

    // --- Step Events ---
    #[serde(rename = "step:start", rename_all = "camelCase")]
    StepStart {
        step_name: String,
        payload: Value,
        timestamp: Timestamp,
    },

    #[serde(rename = "step:success", rename_all = "camelCase")]
    StepSuccess {
        step_name: String,
        payload: Value,
        timestamp: Timestamp,
        duration_ms: u64,
    },

    /// An attempt failed and another one follows.
    #[serde(rename = "step:retry", rename_all = "camelCase")]
    StepRetry {
        step_name: String,
        payload: Value,
        timestamp: Timestamp,
        /// 1-based number of the attempt that failed.
        attempt: u32,
        last_error: String,
    },

    #[serde(rename = "step:rollback", rename_all = "camelCase")]
    StepRollback {
        step_name: String,
        payload: Value,
        timestamp: Timestamp,
    },
}

impl TransactionEvent {
    /// Wire discriminator, e.g. `"step:retry"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TransactionStart { .. } => "transaction:start",
            Self::TransactionSuccess { .. } => "transaction:success",
            Self::TransactionFail { .. } => "transaction:fail",
            Self::TransactionRollback { .. } => "transaction:rollback",
            Self::StepStart { .. } => "step:start",
            Self::StepSuccess { .. } => "step:success",
            Self::StepRetry { .. } => "step:retry",
            Self::StepRollback { .. } => "step:rollback",
        }
    }

    /// Transaction or step name the event refers to.
    pub fn name(&self) -> &str {
        match self {
            Self::TransactionStart { transaction_name, .. }
            | Self::TransactionSuccess { transaction_name, .. }
            | Self::TransactionFail { transaction_name, .. }
            | Self::TransactionRollback { transaction_name, .. } => transaction_name,
            Self::StepStart { step_name, .. }
            | Self::StepSuccess { step_name, .. }
            | Self::StepRetry { step_name, .. }
            | Self::StepRollback { step_name, .. } => step_name,
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(
            self,
            Self::StepStart { .. }
                | Self::StepSuccess { .. }
                | Self::StepRetry { .. }
                | Self::StepRollback { .. }
        )
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::TransactionStart { timestamp, .. }
            | Self::TransactionSuccess { timestamp, .. }
            | Self::TransactionFail { timestamp, .. }
            | Self::TransactionRollback { timestamp, .. }
            | Self::StepStart { timestamp, .. }
            | Self::StepSuccess { timestamp, .. }
            | Self::StepRetry { timestamp, .. }
            | Self::StepRollback { timestamp, .. } => *timestamp,
        }
    }
}

/// Configuration for an event stream.
#[derive(Clone, Debug)]
pub struct EventStreamConfig {
    /// Max buffered events before the stream is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: EventFilter::all(),
        }
    }
}

/// Filter criteria for event streams.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub include_transactions: bool,
    pub include_steps: bool,

    /// Only events whose transaction/step name is listed (None = any).
    pub names: Option<Vec<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self {
            include_transactions: true,
            include_steps: true,
            names: None,
        }
    }

    pub fn transactions() -> Self {
        Self {
            include_transactions: true,
            ..Default::default()
        }
    }

    pub fn steps() -> Self {
        Self {
            include_steps: true,
            ..Default::default()
        }
    }

    /// Restrict to the given names.
    pub fn named(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn matches(&self, event: &TransactionEvent) -> bool {
        let kind_ok = if event.is_step() {
            self.include_steps
        } else {
            self.include_transactions
        };
        if !kind_ok {
            return false;
        }
        match &self.names {
            Some(names) => names.iter().any(|n| n == event.name()),
            None => true,
        }
    }
}

/// Receiving end of an event subscription.
pub struct EventStream {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<TransactionEvent>,
}

impl EventStream {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<TransactionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<TransactionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<TransactionEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Every event currently buffered.
    pub fn drain(&self) -> Vec<TransactionEvent> {
        self.receiver.try_iter().collect()
    }
}
