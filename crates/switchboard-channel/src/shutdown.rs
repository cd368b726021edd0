//! Shared cancellation token for coordinating background task shutdown.
//!
//! Both sides of the fabric spawn background tasks (the hub's accept and
//! event-pump loops, the endpoint's read/reconnect loop) that must stop on
//! demand and be awaited for a clean exit. [`ShutdownToken`] bundles the
//! watch channel and the handle storage those tasks need.

use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A cancellation token that coordinates shutdown of background tasks.
///
/// Tasks hold a subscribed `watch::Receiver<bool>` and check it in
/// `tokio::select!` loops; `signal_stop()` flips it, `join_all()` awaits
/// every registered handle.
pub struct ShutdownToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            stop_tx,
            stop_rx,
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// Get a new subscription to the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Check whether the stop signal has been sent.
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Register a background task handle to await on shutdown.
    pub async fn add_task(&self, handle: JoinHandle<()>) {
        self.task_handles.lock().await.push(handle);
    }

    /// Send the stop signal to all subscribers. Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Await all registered background tasks, draining the handle list.
    ///
    /// Any `JoinError`s (panics, cancellations) are silently ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
