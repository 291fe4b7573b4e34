//! Diagnostic name of the executing thread.
//!
//! `std::thread::Thread` names are fixed at spawn, so the label lives in a
//! thread-local that falls back to the spawn name. On Linux the OS-level name
//! is kept in sync so debuggers and `top -H` show it too.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::thread;

thread_local! {
    static LABEL: RefCell<Option<String>> = RefCell::new(None);
}

/// Installed label, else the spawn name.
pub fn current_name() -> Option<String> {
    LABEL
        .with(|label| label.borrow().clone())
        .or_else(|| thread::current().name().map(str::to_owned))
}

/// Install `name` as this thread's label. `None` clears it, falling back to
/// the spawn name.
pub fn set_current_name(name: Option<&str>) {
    LABEL.with(|label| *label.borrow_mut() = name.map(str::to_owned));

    let current = thread::current();
    if let Some(native_name) = name.or_else(|| current.name()) {
        native::set(native_name);
    }
}

/// Renames the current thread until dropped, then restores the exact label
/// (and OS name) seen at creation.
///
/// The guard restores the thread it was created on, so it cannot be sent:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<wrapexec::thread_name::ThreadNameGuard>();
/// ```
#[derive(Debug)]
#[must_use = "the previous name is restored when the guard is dropped"]
pub struct ThreadNameGuard {
    previous_label: Option<String>,
    previous_native: Option<String>,
    _not_send: PhantomData<*const ()>,
}

/// OS name to put back: the one read at rename time, else the spawn name.
fn native_restore_target(read: Option<String>) -> Option<String> {
    read.or_else(|| thread::current().name().map(str::to_owned))
}

impl ThreadNameGuard {
    pub fn rename(name: &str) -> Self {
        let previous_label = LABEL.with(|label| label.borrow().clone());
        let previous_native = native_restore_target(native::get());

        LABEL.with(|label| *label.borrow_mut() = Some(name.to_owned()));
        native::set(name);

        Self {
            previous_label,
            previous_native,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ThreadNameGuard {
    fn drop(&mut self) {
        let previous = self.previous_label.take();
        LABEL.with(|label| *label.borrow_mut() = previous);

        if let Some(native_name) = self.previous_native.take() {
            native::set(&native_name);
        }
    }
}

#[cfg(target_os = "linux")]
mod native {
    use std::ffi::{CStr, CString};

    // Kernel limit is 16 bytes including the NUL.
    const MAX_LEN: usize = 15;

    pub(super) fn get() -> Option<String> {
        let mut buf = [0 as libc::c_char; MAX_LEN + 1];
        let rc = unsafe {
            libc::pthread_getname_np(libc::pthread_self(), buf.as_mut_ptr(), buf.len())
        };
        if rc != 0 {
            return None;
        }
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }

    pub(super) fn set(name: &str) {
        let mut end = name.len().min(MAX_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let Ok(cname) = CString::new(&name[..end]) else {
            return;
        };
        let rc = unsafe { libc::pthread_setname_np(libc::pthread_self(), cname.as_ptr()) };
        if rc != 0 {
            tracing::trace!(rc, "failed to set native thread name");
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod native {
    pub(super) fn get() -> Option<String> {
        None
    }

    pub(super) fn set(_name: &str) {}
}
