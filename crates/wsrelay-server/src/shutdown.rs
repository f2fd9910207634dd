//! Server-wide session tracking and drain-on-stop.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Owns the server's stop signal and every live session task.
///
/// Sessions derive their own cancellation from [`stop_signal`](Self::stop_signal)
/// and are started with [`spawn_session`](Self::spawn_session). [`drain`](Self::drain)
/// fires the signal, gives the sessions time to send their close frames,
/// then aborts the rest.
pub struct SessionTracker {
    stop: CancellationToken,
    sessions: TaskTracker,
    aborts: Mutex<Vec<AbortHandle>>,
}

impl SessionTracker {
    /// No sessions, stop signal not fired.
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            sessions: TaskTracker::new(),
            aborts: Mutex::new(Vec::new()),
        }
    }

    /// Token fired when the server stops. Session tokens are its children.
    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Fire the stop signal without waiting.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether [`stop`](Self::stop) or [`drain`](Self::drain) has run.
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Run `session` as a tracked task.
    pub fn spawn_session<F>(&self, session: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.sessions.spawn(session);
        let mut aborts = self.aborts.lock();
        aborts.retain(|h| !h.is_finished());
        aborts.push(handle.abort_handle());
        handle
    }

    /// Sessions still running.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stop, then wait up to `grace` for sessions to finish before aborting
    /// the stragglers.
    ///
    /// Returns `true` when every session finished on its own.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.stop();
        self.sessions.close();

        let live = self.sessions.len();
        if live > 0 {
            info!(live, grace_ms = grace.as_millis(), "draining sessions");
        }
        if tokio::time::timeout(grace, self.sessions.wait()).await.is_ok() {
            return true;
        }

        let aborted = {
            let mut aborts = self.aborts.lock();
            aborts.iter().for_each(AbortHandle::abort);
            aborts.drain(..).count()
        };
        warn!(
            remaining = self.sessions.len(),
            aborted,
            "sessions did not close within {grace:?}; aborted"
        );
        false
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}
