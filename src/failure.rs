//! Uncaught task failures and the handlers that receive them.
//!
//! A failure is a panic unwinding out of a task body. Handlers are resolved
//! per task through a fallback chain: an explicitly configured handler, then
//! the handler registered on the executing thread, then [`LoggingFailureHandler`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic;
use std::sync::{Arc, OnceLock};
use std::thread::Thread;

use crate::thread_name;

/// A panic caught while running a task.
pub struct TaskFailure {
    payload: Box<dyn Any + Send>,
}

impl TaskFailure {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        Self { payload }
    }

    /// Human-readable panic message, when the payload is a string.
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Box<dyn Any>"
        }
    }

    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.payload
    }

    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }

    /// Re-raise the original panic on the current thread.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Receives failures that escaped a task body.
pub trait UncaughtFailureHandler: Send + Sync {
    fn uncaught_failure(&self, thread: &Thread, failure: TaskFailure);
}

impl<F> UncaughtFailureHandler for F
where
    F: Fn(&Thread, TaskFailure) + Send + Sync,
{
    fn uncaught_failure(&self, thread: &Thread, failure: TaskFailure) {
        self(thread, failure)
    }
}

/// Default sink: one `error` event per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFailureHandler;

/// The diagnostic label is only readable on the thread it belongs to; for
/// any other thread the spawn name is used.
fn display_name(thread: &Thread) -> String {
    let label = if thread.id() == std::thread::current().id() {
        thread_name::current_name()
    } else {
        None
    };

    label
        .or_else(|| thread.name().map(str::to_owned))
        .unwrap_or_else(|| "<unnamed>".to_string())
}

impl UncaughtFailureHandler for LoggingFailureHandler {
    fn uncaught_failure(&self, thread: &Thread, failure: TaskFailure) {
        let name = display_name(thread);

        tracing::error!(
            thread = %name,
            thread_id = ?thread.id(),
            "uncaught failure in task: {}",
            failure.message()
        );
    }
}

/// The shared default handler.
pub fn logging_handler() -> Arc<dyn UncaughtFailureHandler> {
    static LOGGING: OnceLock<Arc<dyn UncaughtFailureHandler>> = OnceLock::new();
    LOGGING.get_or_init(|| Arc::new(LoggingFailureHandler)).clone()
}

thread_local! {
    static THREAD_HANDLER: RefCell<Option<Arc<dyn UncaughtFailureHandler>>> = RefCell::new(None);
}

/// Register the current thread's own handler, returning the previous one.
pub fn set_thread_handler(
    handler: Option<Arc<dyn UncaughtFailureHandler>>,
) -> Option<Arc<dyn UncaughtFailureHandler>> {
    THREAD_HANDLER.with(|cell| cell.replace(handler))
}

pub fn thread_handler() -> Option<Arc<dyn UncaughtFailureHandler>> {
    THREAD_HANDLER.with(|cell| cell.borrow().clone())
}

/// Explicit handler, else the current thread's own, else the logging handler.
pub fn resolve_handler(
    explicit: Option<&Arc<dyn UncaughtFailureHandler>>,
) -> Arc<dyn UncaughtFailureHandler> {
    if let Some(handler) = explicit {
        return Arc::clone(handler);
    }
    thread_handler().unwrap_or_else(logging_handler)
}
