//! Runs one step with bounded retry and an optional per-attempt timeout.

use super::Step;
use crate::error::{Error, Result};
use crate::events::{EventBus, TransactionEvent};
use crate::state::Draft;
use crate::types::{BoxError, Timestamp};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct StepExecutor {
    events: Arc<EventBus>,
}

impl StepExecutor {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }

    /// Attempt `step` up to `1 + retries` times, returning the last error
    /// once attempts are exhausted.
    ///
    /// A timed-out attempt is reported as [`Error::Timeout`]; the step body
    /// keeps running in the background.
    pub async fn execute_step(&self, step: &Step, draft: &Draft, payload: &Value) -> Result<()> {
        let started = Instant::now();
        self.events.emit(TransactionEvent::StepStart {
            step_name: step.name().to_string(),
            payload: payload.clone(),
            timestamp: Timestamp::now(),
        });

        let attempts = step.retry_count().saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.attempt(step, draft, payload).await {
                Ok(()) => {
                    self.events.emit(TransactionEvent::StepSuccess {
                        step_name: step.name().to_string(),
                        payload: payload.clone(),
                        timestamp: Timestamp::now(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        step = %step.name(),
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "step attempt failed, retrying"
                    );
                    self.events.emit(TransactionEvent::StepRetry {
                        step_name: step.name().to_string(),
                        payload: payload.clone(),
                        timestamp: Timestamp::now(),
                        attempt,
                        last_error: err.to_string(),
                    });
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, step: &Step, draft: &Draft, payload: &Value) -> Result<()> {
        let body = (step.body())(draft.clone(), payload.clone());

        let Some(limit) = step.time_limit() else {
            return body.await.map_err(|source| step_failed(step, source));
        };

        let task = tokio::spawn(body);
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result.map_err(|source| step_failed(step, source)),
            Ok(Err(join)) => Err(step_failed(step, Box::new(join))),
            Err(_) => Err(Error::Timeout {
                step: step.name().to_string(),
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }
}

fn step_failed(step: &Step, source: BoxError) -> Error {
    Error::StepFailed {
        step: step.name().to_string(),
        source,
    }
}
