//! Background flush and merge thread.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    shutdown: bool,
}

/// Wakes the worker early, or tells it to exit.
#[derive(Debug, Default)]
struct Signal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl Signal {
    fn notify(&self) {
        self.state.lock().pending = true;
        self.condvar.notify_one();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.condvar.notify_all();
    }

    /// Sleeps until notified or `timeout` passes. Returns true on shutdown.
    fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.pending && !state.shutdown {
            self.condvar.wait_for(&mut state, timeout);
        }
        state.pending = false;
        state.shutdown
    }
}

/// A named thread that runs one task whenever it is notified and at
/// least once per interval.
///
/// The task is never run concurrently with itself. `stop` wakes the
/// thread and joins it; a task that is running finishes first.
#[derive(Debug)]
pub struct BackgroundWorker {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns the thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn start<F>(name: &str, interval: Duration, mut task: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(Signal::default());
        let thread_signal = Arc::clone(&signal);
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                debug!(worker = %thread_name, ?interval, "background worker started");
                while !thread_signal.wait(interval) {
                    task();
                }
                debug!(worker = %thread_name, "background worker stopped");
            })
            .map_err(|e| {
                error!(worker = name, error = %e, "failed to spawn background worker");
                e
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Runs the task soon, without waiting for the interval.
    pub fn notify(&self) {
        self.signal.notify();
    }

    /// Signals the thread to exit and waits for it.
    pub fn stop(&mut self) {
        self.signal.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("background worker panicked");
            }
        }
    }

    /// Whether the thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn notify_runs_task_promptly() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut worker = BackgroundWorker::start("test-worker", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        worker.notify();
        assert!(wait_until(Duration::from_secs(5), || runs.load(Ordering::SeqCst) >= 1));
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn interval_runs_task_without_notify() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let _worker = BackgroundWorker::start("test-worker", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || runs.load(Ordering::SeqCst) >= 2));
    }

    #[test]
    fn stop_is_prompt_and_idempotent() {
        let mut worker =
            BackgroundWorker::start("test-worker", Duration::from_secs(60), || {}).unwrap();
        let start = Instant::now();
        worker.stop();
        worker.stop();
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
