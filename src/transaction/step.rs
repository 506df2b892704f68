//! Step definitions.

use crate::state::Draft;
use crate::types::{BoxError, BoxFuture};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Body of a step or of its compensation.
pub type StepFn = Arc<dyn Fn(Draft, Value) -> BoxFuture<Result<(), BoxError>> + Send + Sync>;

/// Atomic unit of work with an optional compensating action.
#[derive(Clone)]
pub struct Step {
    name: String,
    execute: StepFn,
    compensate: Option<StepFn>,
    retries: u32,
    timeout: Option<Duration>,
}

fn boxed<F, Fut>(f: F) -> StepFn
where
    F: Fn(Draft, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |draft: Draft, payload: Value| -> BoxFuture<Result<(), BoxError>> {
        Box::pin(f(draft, payload))
    })
}

fn blocking<F>(f: F) -> StepFn
where
    F: Fn(&Draft, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(move |draft: Draft, payload: Value| -> BoxFuture<Result<(), BoxError>> {
        let result = f(&draft, &payload);
        Box::pin(async move { result })
    })
}

impl Step {
    /// Step with an async body.
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Draft, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::with_body(name, boxed(execute))
    }

    /// Step with a synchronous body.
    pub fn from_fn<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(&Draft, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_body(name, blocking(execute))
    }

    fn with_body(name: impl Into<String>, execute: StepFn) -> Self {
        Self {
            name: name.into(),
            execute,
            compensate: None,
            retries: 0,
            timeout: None,
        }
    }

    /// Attach an async compensation.
    pub fn compensate<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(Draft, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.compensate = Some(boxed(compensate));
        self
    }

    /// Attach a synchronous compensation.
    pub fn compensate_fn<F>(mut self, compensate: F) -> Self
    where
        F: Fn(&Draft, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.compensate = Some(blocking(compensate));
        self
    }

    /// Extra attempts after the first failure.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Per-attempt time limit. A zero duration disables the limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_count(&self) -> u32 {
        self.retries
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }

    pub(crate) fn body(&self) -> &StepFn {
        &self.execute
    }

    pub(crate) fn compensation(&self) -> Option<&StepFn> {
        self.compensate.as_ref()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("compensate", &self.compensate.is_some())
            .finish()
    }
}
