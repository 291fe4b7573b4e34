pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::context::{ContextCleaner, ContextExecutor, ContextHandler, FnContextHandler};
pub use crate::error::{Error, Result};
pub use crate::executor::{DirectExecutor, ExecutorService, Task, ThreadPool};
pub use crate::failure::{TaskFailure, UncaughtFailureHandler};
pub use crate::renaming::RenamingExecutor;
