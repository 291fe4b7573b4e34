//! The execution-service capability and the executors implementing it.
//!
//! [`ExecutorService`] is the one seam every executor in this crate sits
//! behind: the pool, the inline executor and both decorators. Decorators hold
//! their delegate as `Arc<E>` with `E: ?Sized`, so they stack in either order
//! and share the delegate with other owners.

pub mod direct;
pub mod pool;
pub mod task;

pub use direct::DirectExecutor;
pub use pool::ThreadPool;
pub use task::{Task, TaskId};

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

pub trait ExecutorService: Send + Sync {
    /// Hand `task` over for execution. Fails with
    /// [`Error::Rejected`](crate::Error::Rejected) once shut down.
    fn execute(&self, task: Task) -> Result<()>;

    /// Stop accepting work; already queued tasks still run.
    fn shutdown(&self);

    /// Stop accepting work and return the tasks that never started.
    fn shutdown_now(&self) -> Vec<Task>;

    fn is_shutdown(&self) -> bool;

    /// True once shut down and every accepted task has finished.
    fn is_terminated(&self) -> bool;

    /// Block until terminated or `timeout` elapses. Returns `is_terminated()`.
    fn await_termination(&self, timeout: Duration) -> bool;

    fn spawn<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.execute(Task::new(f))
    }
}

macro_rules! forward_executor_service {
    ($ptr:ident) => {
        impl<E: ExecutorService + ?Sized> ExecutorService for $ptr<E> {
            fn execute(&self, task: Task) -> Result<()> {
                (**self).execute(task)
            }

            fn shutdown(&self) {
                (**self).shutdown()
            }

            fn shutdown_now(&self) -> Vec<Task> {
                (**self).shutdown_now()
            }

            fn is_shutdown(&self) -> bool {
                (**self).is_shutdown()
            }

            fn is_terminated(&self) -> bool {
                (**self).is_terminated()
            }

            fn await_termination(&self, timeout: Duration) -> bool {
                (**self).await_termination(timeout)
            }
        }
    };
}

forward_executor_service!(Arc);
forward_executor_service!(Box);

/// Lifecycle pass-through shared by the decorators: every call goes straight
/// to `self.delegate` with no bookkeeping of its own.
macro_rules! delegate_lifecycle {
    () => {
        fn shutdown(&self) {
            self.delegate.shutdown()
        }

        fn shutdown_now(&self) -> Vec<$crate::executor::Task> {
            self.delegate.shutdown_now()
        }

        fn is_shutdown(&self) -> bool {
            self.delegate.is_shutdown()
        }

        fn is_terminated(&self) -> bool {
            self.delegate.is_terminated()
        }

        fn await_termination(&self, timeout: ::std::time::Duration) -> bool {
            self.delegate.await_termination(timeout)
        }
    };
}

pub(crate) use delegate_lifecycle;
