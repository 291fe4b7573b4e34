//! Executor that runs each task on the submitting thread.

use super::task::Task;
use super::ExecutorService;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct DirectState {
    shutdown: bool,
    running: usize,
}

/// Runs tasks inline inside `execute`. A panicking task unwinds into the
/// caller of `execute`.
#[derive(Debug, Default)]
pub struct DirectExecutor {
    state: Mutex<DirectState>,
    idle: Condvar,
}

struct Running<'a>(&'a DirectExecutor);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.running -= 1;
        if state.running == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl DirectExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutorService for DirectExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(Error::rejected(format!(
                    "direct executor is shut down, task {}",
                    task.id()
                )));
            }
            state.running += 1;
        }

        let _running = Running(self);
        task.run();
        Ok(())
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.idle.notify_all();
    }

    fn shutdown_now(&self) -> Vec<Task> {
        self.shutdown();
        Vec::new()
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        let state = self.state.lock();
        state.shutdown && state.running == 0
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !(state.shutdown && state.running == 0) {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.shutdown && state.running == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_runs_inline_on_caller_thread() {
        let executor = DirectExecutor::new();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let slot = ran_on.clone();
        executor
            .spawn(move || *slot.lock() = Some(thread::current().id()))
            .unwrap();

        assert_eq!(*ran_on.lock(), Some(caller));
    }

    #[test]
    fn test_panic_reaches_caller_and_state_recovers() {
        let executor = DirectExecutor::new();

        let result = catch_unwind(AssertUnwindSafe(|| executor.spawn(|| panic!("inline"))));
        assert!(result.is_err());

        executor.shutdown();
        assert!(executor.is_terminated());
    }

    #[test]
    fn test_lifecycle() {
        let executor = DirectExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        executor
            .spawn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(!executor.is_shutdown());
        assert!(!executor.await_termination(Duration::from_millis(10)));

        assert!(executor.shutdown_now().is_empty());
        assert!(executor.is_shutdown());
        assert!(executor.await_termination(Duration::from_millis(10)));
        assert!(executor.spawn(|| {}).unwrap_err().is_rejected());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
