use crate::error::{Error, Result};
use crate::failure::UncaughtFailureHandler;
use std::fmt;
use std::sync::Arc;

const MAX_THREADS: usize = 1024;

#[derive(Clone)]
pub struct PoolConfig {
    pub num_threads: Option<usize>,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    /// Registered as each worker's own uncaught-failure handler.
    pub failure_handler: Option<Arc<dyn UncaughtFailureHandler>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "wrapexec-worker".to_string(),
            failure_handler: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("num_threads", &self.num_threads)
            .field("stack_size", &self.stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("failure_handler", &self.failure_handler.is_some())
            .finish()
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > MAX_THREADS {
                return Err(Error::config(format!(
                    "num_threads too large (max {})",
                    MAX_THREADS
                )));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        if self.stack_size == Some(0) {
            return Err(Error::config("stack_size must be > 0"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads
            .unwrap_or_else(num_cpus::get)
            .clamp(1, MAX_THREADS)
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn failure_handler(mut self, handler: Arc<dyn UncaughtFailureHandler>) -> Self {
        self.config.failure_handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads() >= 1);
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        let result = PoolConfig::builder().num_threads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_too_many_threads() {
        let result = PoolConfig::builder().num_threads(MAX_THREADS + 1).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_empty_prefix() {
        let result = PoolConfig::builder().thread_name_prefix("").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_values() {
        let config = PoolConfig::builder()
            .num_threads(3)
            .thread_name_prefix("io")
            .failure_handler(Arc::new(|_: &std::thread::Thread, _: crate::failure::TaskFailure| {}))
            .build()
            .unwrap();

        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.thread_name_prefix, "io");
        assert!(config.failure_handler.is_some());
    }
}
