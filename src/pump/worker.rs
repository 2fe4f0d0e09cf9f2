//! Dedicated processing thread with cooperative stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::AudioError;

/// A named thread calling one cycle function until stopped or failed.
///
/// The thread exits with the first error a cycle returns; that error is the
/// thread's exit status, handed back by [`stop`](Worker::stop).
pub(crate) struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), AudioError>>>,
}

impl Worker {
    pub fn spawn<F>(name: String, mut cycle: F) -> Result<Self, AudioError>
    where
        F: FnMut() -> Result<(), AudioError> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!("pump thread running");
                while flag.load(Ordering::SeqCst) {
                    if let Err(error) = cycle() {
                        flag.store(false, Ordering::SeqCst);
                        tracing::error!(%error, "pump thread exiting");
                        return Err(error);
                    }
                }
                tracing::debug!("pump thread stopped");
                Ok(())
            })
            .map_err(|e| AudioError::ThreadSpawn {
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            running,
            handle: Some(handle),
        })
    }

    /// Returns `true` until the thread is stopped or a cycle fails.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the running flag, calls `unblock` to interrupt a cycle stuck in
    /// blocking I/O, and joins the thread.
    ///
    /// Returns the error the thread exited with, if any. Called from the
    /// worker thread itself, the thread is detached instead of joined.
    pub fn stop(mut self, unblock: impl FnOnce()) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        unblock();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            tracing::warn!(thread = %self.name, "pump stopped from its own thread");
            return Ok(());
        }
        match handle.join() {
            Ok(status) => status,
            Err(_) => Err(AudioError::ThreadPanicked {
                name: self.name.clone(),
            }),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Not joined: the port may still block the thread.
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_runs_until_stopped() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = cycles.clone();
        let worker = Worker::spawn("test-worker".into(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            Ok(())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(worker.is_running());
        let mut unblocked = false;
        assert_eq!(worker.stop(|| unblocked = true), Ok(()));
        assert!(unblocked);
        assert!(cycles.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_cycle_error_is_exit_status() {
        let worker = Worker::spawn("failing-worker".into(), || {
            Err(AudioError::port_io("hw", "gone"))
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_running());
        assert!(matches!(worker.stop(|| {}), Err(AudioError::PortIo { .. })));
    }

    #[test]
    fn test_panic_is_reported() {
        let worker = Worker::spawn("panicking-worker".into(), || panic!("boom")).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            worker.stop(|| {}),
            Err(AudioError::ThreadPanicked { .. })
        ));
    }
}
