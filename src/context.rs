//! Context propagation from the submitting thread to the worker thread.
//!
//! [`ContextExecutor`] asks its [`ContextHandler`] for a snapshot inside
//! `execute`, on the caller's thread, and carries it with the task. On the
//! worker the snapshot is installed right before the task body and the
//! returned [`ContextCleaner`] is dropped right after it, on every exit path.
//! Panics from the task body are re-raised after cleanup, so the delegate's
//! own failure handling still sees them. A panic from the cleaner itself is
//! raised when the body succeeded and logged when it did not.

use crate::error::Result;
use crate::executor::{delegate_lifecycle, ExecutorService, Task};
use crate::failure::TaskFailure;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Captures context on the submitting thread and installs it on the worker.
pub trait ContextHandler: Send + Sync {
    type Context: Send + 'static;

    /// Called once per submission, on the submitting thread.
    fn collect(&self) -> Self::Context;

    /// Called on the worker right before the task body. The returned cleaner
    /// is dropped once the body has finished or unwound.
    fn install(&self, context: Self::Context) -> Option<ContextCleaner>;
}

/// Undoes whatever [`ContextHandler::install`] did, exactly once, on drop.
#[must_use = "dropping the cleaner immediately undoes the installed context"]
pub struct ContextCleaner {
    undo: Option<Box<dyn FnOnce()>>,
}

impl ContextCleaner {
    pub fn new<F>(undo: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            undo: Some(Box::new(undo)),
        }
    }

    /// Undo now rather than at end of scope.
    pub fn clean(self) {
        drop(self);
    }
}

impl Drop for ContextCleaner {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

impl fmt::Debug for ContextCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCleaner")
            .field("pending", &self.undo.is_some())
            .finish()
    }
}

/// [`ContextHandler`] built from a pair of closures.
pub struct FnContextHandler<C, Col, Ins> {
    collect: Col,
    install: Ins,
    _context: PhantomData<fn() -> C>,
}

impl<C, Col, Ins> FnContextHandler<C, Col, Ins>
where
    C: Send + 'static,
    Col: Fn() -> C + Send + Sync,
    Ins: Fn(C) -> Option<ContextCleaner> + Send + Sync,
{
    pub fn new(collect: Col, install: Ins) -> Self {
        Self {
            collect,
            install,
            _context: PhantomData,
        }
    }
}

impl<C, Col, Ins> ContextHandler for FnContextHandler<C, Col, Ins>
where
    C: Send + 'static,
    Col: Fn() -> C + Send + Sync,
    Ins: Fn(C) -> Option<ContextCleaner> + Send + Sync,
{
    type Context = C;

    fn collect(&self) -> C {
        (self.collect)()
    }

    fn install(&self, context: C) -> Option<ContextCleaner> {
        (self.install)(context)
    }
}

impl<C, Col, Ins> fmt::Debug for FnContextHandler<C, Col, Ins> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnContextHandler").finish_non_exhaustive()
    }
}

/// Decorator propagating a [`ContextHandler`]'s context into every task.
pub struct ContextExecutor<E: ?Sized, H> {
    delegate: Arc<E>,
    handler: Arc<H>,
}

impl<E, H> ContextExecutor<E, H>
where
    E: ExecutorService + ?Sized,
    H: ContextHandler + 'static,
{
    pub fn new(delegate: Arc<E>, handler: H) -> Self {
        Self::with_shared_handler(delegate, Arc::new(handler))
    }

    pub fn with_shared_handler(delegate: Arc<E>, handler: Arc<H>) -> Self {
        Self { delegate, handler }
    }

    pub fn delegate(&self) -> &Arc<E> {
        &self.delegate
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<E, H> ExecutorService for ContextExecutor<E, H>
where
    E: ExecutorService + ?Sized,
    H: ContextHandler + 'static,
{
    fn execute(&self, task: Task) -> Result<()> {
        // A panic here reaches the caller before anything is enqueued.
        let context = self.handler.collect();
        let handler = Arc::clone(&self.handler);

        self.delegate.execute(Task::new(move || {
            let cleaner = handler.install(context);
            let outcome = catch_unwind(AssertUnwindSafe(|| task.run()));
            let cleanup = catch_unwind(AssertUnwindSafe(move || drop(cleaner)));

            match (outcome, cleanup) {
                (Ok(()), Ok(())) => {}
                (Err(payload), Ok(())) | (Ok(()), Err(payload)) => resume_unwind(payload),
                (Err(payload), Err(suppressed)) => {
                    tracing::warn!(
                        "context cleanup failed after task failure: {}",
                        TaskFailure::from_payload(suppressed).message()
                    );
                    resume_unwind(payload)
                }
            }
        }))
    }

    delegate_lifecycle!();
}

impl<E: fmt::Debug + ?Sized, H> fmt::Debug for ContextExecutor<E, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextExecutor")
            .field("delegate", &self.delegate)
            .finish_non_exhaustive()
    }
}
