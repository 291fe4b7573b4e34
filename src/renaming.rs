//! Worker thread renaming for the duration of each task.
//!
//! Each task runs under a freshly supplied thread name. Panics escaping the
//! task are absorbed here and handed to an [`UncaughtFailureHandler`]
//! (explicit, else the worker's own, else [`LoggingFailureHandler`]); the
//! delegate's failure channel never sees them. The previous name is restored
//! last, even when the failure handler itself panics.
//!
//! [`LoggingFailureHandler`]: crate::failure::LoggingFailureHandler

use crate::error::{Error, Result};
use crate::executor::{delegate_lifecycle, ExecutorService, Task};
use crate::failure::{self, TaskFailure, UncaughtFailureHandler};
use crate::thread_name::ThreadNameGuard;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

pub type NameSupplier = Arc<dyn Fn() -> String + Send + Sync>;

/// Configuration shared by every task submitted through one executor.
struct RenamingConfig {
    failure_handler: Option<Arc<dyn UncaughtFailureHandler>>,
    name_supplier: NameSupplier,
}

impl RenamingConfig {
    fn run(&self, task: Task) {
        let _name = ThreadNameGuard::rename(&(self.name_supplier)());

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
            let handler = failure::resolve_handler(self.failure_handler.as_ref());
            handler.uncaught_failure(&thread::current(), TaskFailure::from_payload(payload));
        }
    }
}

pub struct RenamingExecutor<E: ?Sized> {
    delegate: Arc<E>,
    config: Arc<RenamingConfig>,
}

impl<E: ExecutorService + ?Sized> RenamingExecutor<E> {
    pub fn new<F>(
        delegate: Arc<E>,
        failure_handler: Option<Arc<dyn UncaughtFailureHandler>>,
        name_supplier: F,
    ) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            delegate,
            config: Arc::new(RenamingConfig {
                failure_handler,
                name_supplier: Arc::new(name_supplier),
            }),
        }
    }

    pub fn builder(delegate: Arc<E>) -> RenamingExecutorBuilder<E> {
        RenamingExecutorBuilder {
            delegate,
            failure_handler: None,
            name_supplier: None,
        }
    }

    pub fn delegate(&self) -> &Arc<E> {
        &self.delegate
    }
}

impl<E: ExecutorService + ?Sized> ExecutorService for RenamingExecutor<E> {
    fn execute(&self, task: Task) -> Result<()> {
        let config = Arc::clone(&self.config);
        self.delegate.execute(Task::new(move || config.run(task)))
    }

    delegate_lifecycle!();
}

impl<E: fmt::Debug + ?Sized> fmt::Debug for RenamingExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenamingExecutor")
            .field("delegate", &self.delegate)
            .finish()
    }
}

pub struct RenamingExecutorBuilder<E: ?Sized> {
    delegate: Arc<E>,
    failure_handler: Option<Arc<dyn UncaughtFailureHandler>>,
    name_supplier: Option<NameSupplier>,
}

impl<E: ExecutorService + ?Sized> RenamingExecutorBuilder<E> {
    pub fn failure_handler(mut self, handler: Arc<dyn UncaughtFailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn name_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.name_supplier = Some(Arc::new(supplier));
        self
    }

    /// Fixed name for every task.
    pub fn name<S: Into<String>>(self, name: S) -> Self {
        let name = name.into();
        self.name_supplier(move || name.clone())
    }

    pub fn build(self) -> Result<RenamingExecutor<E>> {
        let name_supplier = self
            .name_supplier
            .ok_or_else(|| Error::config("renaming executor requires a name supplier"))?;

        Ok(RenamingExecutor {
            delegate: self.delegate,
            config: Arc::new(RenamingConfig {
                failure_handler: self.failure_handler,
                name_supplier,
            }),
        })
    }
}

impl<E: fmt::Debug + ?Sized> fmt::Debug for RenamingExecutorBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenamingExecutorBuilder")
            .field("delegate", &self.delegate)
            .field("failure_handler", &self.failure_handler.is_some())
            .field("name_supplier", &self.name_supplier.is_some())
            .finish()
    }
}
