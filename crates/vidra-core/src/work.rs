//! Units of work run by the supervisor.
//!
//! Every attempt calls [`Work::run`] again and gets a fresh future.
//! The [`CancellationToken`] handed in fires on `stop`, `stop_all`, shutdown,
//! or when the caller's parent scope is cancelled; work should watch it and return promptly.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::WorkError;

pub type BoxWorkFuture = Pin<Box<dyn Future<Output = Result<(), WorkError>> + Send + 'static>>;

/// Shared handle to a unit of work.
pub type WorkRef = Arc<dyn Work>;

pub trait Work: Send + Sync + 'static {
    fn run(&self, ctx: CancellationToken) -> BoxWorkFuture;
}

/// Closure-backed [`Work`].
pub struct WorkFn<F> {
    f: F,
}

impl<F, Fut> WorkFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> WorkRef {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Work for WorkFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    fn run(&self, ctx: CancellationToken) -> BoxWorkFuture {
        Box::pin((self.f)(ctx))
    }
}
