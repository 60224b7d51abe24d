//! Two-phase bring-up orchestration.
//!
//! The critical (DEFAULT) pass must run to completion synchronously; the
//! slow (BACKGROUND) pass, mostly PSU and power-controller probing, can
//! then run on a worker thread while the caller proceeds. The caller syncs
//! up later through a bounded-timeout join; the hardware itself is awaited
//! separately via `Component::wait_for_it`.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use log::debug;

use crate::{HalError, Result};

/// Handle on a background bring-up pass.
pub struct BackgroundTask {
    done: Receiver<Result<()>>,
    handle: thread::JoinHandle<()>,
}

impl BackgroundTask {
    /// Wait for the pass to complete, bounded. Expiry returns a timeout
    /// error and leaves the worker running.
    pub fn join(self, timeout: Duration) -> Result<()> {
        match self.done.recv_timeout(timeout) {
            Ok(result) => {
                let _ = self.handle.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                Err(HalError::Timeout("background bring-up".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(HalError::Missing("background bring-up result".to_string()))
            }
        }
    }
}

/// Run a bring-up closure on a worker thread. Call this only after the
/// critical pass has fully completed and returned.
pub fn spawn_background<F>(work: F) -> BackgroundTask
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let handle = thread::spawn(move || {
        debug!("background bring-up pass starting");
        let _ = tx.send(work());
        debug!("background bring-up pass done");
    });
    BackgroundTask { done: rx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_background_pass_completes() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = spawn_background(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        task.join(Duration::from_secs(5)).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_background_pass_propagates_errors() {
        let task = spawn_background(|| Err(HalError::Config("boom".to_string())));
        assert!(task.join(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_join_times_out() {
        let task = spawn_background(|| {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        assert!(matches!(
            task.join(Duration::from_millis(20)),
            Err(HalError::Timeout(_))
        ));
    }
}
