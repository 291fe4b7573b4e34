//! Executor decorators that add per-task behavior without touching the pool.
//!
//! Both decorators implement the same [`ExecutorService`] trait as the
//! executor they wrap, so they stack in either order:
//!
//! - [`ContextExecutor`] captures a context snapshot on the submitting thread
//!   and installs it on the worker around the task body, with guaranteed
//!   cleanup.
//! - [`RenamingExecutor`] renames the worker thread for the duration of each
//!   task, absorbs task panics into an uncaught-failure handler, and restores
//!   the previous name on every exit path.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrapexec::prelude::*;
//!
//! let pool = Arc::new(ThreadPool::with_threads(4).unwrap());
//! let renaming = RenamingExecutor::builder(pool.clone())
//!     .name("request-handler")
//!     .build()
//!     .unwrap();
//!
//! renaming.spawn(|| println!("running as request-handler")).unwrap();
//!
//! renaming.shutdown();
//! renaming.await_termination(std::time::Duration::from_secs(1));
//! ```

#![warn(missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod failure;
pub mod prelude;
pub mod renaming;
pub mod thread_name;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use context::{ContextCleaner, ContextExecutor, ContextHandler, FnContextHandler};
pub use error::{Error, Result};
pub use executor::{DirectExecutor, ExecutorService, Task, TaskId, ThreadPool};
pub use failure::{LoggingFailureHandler, TaskFailure, UncaughtFailureHandler};
pub use renaming::{RenamingExecutor, RenamingExecutorBuilder};
