//! Onion-style middleware around transaction execution.
//!
//! Middleware run in registration order on the way in and unwind in reverse
//! order on the way out. Each one receives a [`Next`] handle; awaiting
//! [`Next::run`] enters the rest of the chain, never calling it skips the
//! rest silently, and calling it twice fails with
//! [`Error::NextCalledMultipleTimes`].
//!
//! ```ignore
//! let tx = TransactionBuilder::new("checkout", &manager)
//!     .middleware_fn(|ctx, next| async move {
//!         let started = std::time::Instant::now();
//!         next.run().await?;
//!         tracing::info!(transaction = %ctx.transaction(), elapsed = ?started.elapsed(), "done");
//!         Ok(())
//!     })
//!     .step(reserve)
//!     .build();
//! ```

use crate::error::{Error, Result};
use crate::state::StateManager;
use crate::types::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a middleware sees of the running transaction.
#[derive(Clone)]
pub struct MiddlewareContext {
    transaction: String,
    payload: Value,
    state: Arc<StateManager>,
}

impl MiddlewareContext {
    pub fn new(transaction: impl Into<String>, payload: Value, state: Arc<StateManager>) -> Self {
        Self {
            transaction: transaction.into(),
            payload,
            state,
        }
    }

    /// Name of the transaction being run.
    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn get_state(&self) -> Arc<Value> {
        self.state.get_state()
    }

    pub fn set_state(&self, next: Value) -> bool {
        self.state.set_state(next)
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }
}

/// A wrapper around transaction execution.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, ctx: MiddlewareContext, next: Next) -> BoxFuture<Result<()>>;
}

/// Adapter turning an async closure into a [`Middleware`].
pub struct FnMiddleware<F>(F);

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(MiddlewareContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, ctx: MiddlewareContext, next: Next) -> BoxFuture<Result<()>> {
        Box::pin((self.0)(ctx, next))
    }
}

/// Build a middleware from an async closure.
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(MiddlewareContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnMiddleware(f)
}

/// Innermost piece of work the chain wraps.
pub type Continuation = Box<dyn FnOnce() -> BoxFuture<Result<()>> + Send>;

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: impl Middleware) {
        self.middleware.push(Arc::new(middleware));
    }

    pub fn push_fn<F, Fut>(&mut self, f: F)
    where
        F: Fn(MiddlewareContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(from_fn(f));
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run `core` wrapped in every middleware.
    pub async fn execute(
        &self,
        ctx: MiddlewareContext,
        core: impl FnOnce() -> BoxFuture<Result<()>> + Send + 'static,
    ) -> Result<()> {
        let core: Continuation = Box::new(core);
        let dispatch = Arc::new(Dispatch {
            middleware: self.middleware.clone(),
            context: ctx,
            core: Mutex::new(Some(core)),
        });
        dispatch.dispatch(0).await
    }
}

struct Dispatch {
    middleware: Vec<Arc<dyn Middleware>>,
    context: MiddlewareContext,
    core: Mutex<Option<Continuation>>,
}

impl Dispatch {
    fn dispatch(self: &Arc<Self>, index: usize) -> BoxFuture<Result<()>> {
        match self.middleware.get(index) {
            Some(middleware) => {
                let next = Next {
                    dispatch: Arc::clone(self),
                    index: index + 1,
                    called: AtomicBool::new(false),
                };
                middleware.handle(self.context.clone(), next)
            }
            None => {
                let core = self.core.lock().take();
                match core {
                    Some(core) => core(),
                    None => Box::pin(async { Err(Error::NextCalledMultipleTimes) }),
                }
            }
        }
    }
}

/// Handle to the downstream part of the chain.
pub struct Next {
    dispatch: Arc<Dispatch>,
    index: usize,
    called: AtomicBool,
}

impl Next {
    /// Enter the downstream middleware (or the core once all have run).
    pub fn run(&self) -> BoxFuture<Result<()>> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Box::pin(async { Err(Error::NextCalledMultipleTimes) });
        }
        self.dispatch.dispatch(self.index)
    }

    /// Whether [`Next::run`] has been invoked.
    pub fn was_called(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }
}
