//! The logging fallback installs a process-wide subscriber, so it lives in
//! its own test binary.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use wrapexec::prelude::*;
use wrapexec::thread_name;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn test_failing_task_on_single_worker_is_logged_once_and_name_restored() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::ERROR)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = PoolConfig::builder()
        .num_threads(1)
        .thread_name_prefix("single")
        .build()
        .unwrap();
    let pool = Arc::new(ThreadPool::new(&config).unwrap());
    let executor = RenamingExecutor::new(pool.clone(), None, || "worker-X".to_string());
    let (tx, rx) = crossbeam_channel::unbounded();

    let before = tx.clone();
    pool.spawn(move || before.send(thread_name::current_name()).unwrap())
        .unwrap();
    executor.spawn(|| panic!("scenario failure")).unwrap();
    pool.spawn(move || tx.send(thread_name::current_name()).unwrap())
        .unwrap();

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)));

    let names: Vec<_> = rx.try_iter().collect();
    assert_eq!(names.len(), 2);
    assert_eq!(names[0], names[1]);
    assert_eq!(names[0].as_deref(), Some("single-0"));

    let logged = capture.contents();
    assert_eq!(logged.matches("uncaught failure in task").count(), 1);
    assert!(logged.contains("scenario failure"));
    assert!(logged.contains("worker-X"));
    assert_eq!(pool.panicked_tasks(), 0);
}
