//! Shared session bookkeeping and the idle watchdog.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::Direction;

/// Close reason sent when a session is cancelled without a peer close.
const DEFAULT_CLOSE_REASON: &str = "going away";

/// State the pumps of one session share.
pub struct SessionActivity {
    last_activity: Mutex<Instant>,
    inbound_messages: AtomicU64,
    outbound_messages: AtomicU64,
    /// The pump that stopped first on its own (not through cancellation).
    initiator: OnceLock<Direction>,
    close_reason: OnceLock<&'static str>,
}

impl SessionActivity {
    /// Fresh bookkeeping; the idle clock starts now.
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
            inbound_messages: AtomicU64::new(0),
            outbound_messages: AtomicU64::new(0),
            initiator: OnceLock::new(),
            close_reason: OnceLock::new(),
        }
    }

    /// A message was read; reset the idle clock.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// A message was delivered in `direction`.
    pub fn record_delivery(&self, direction: Direction) {
        let counter = match direction {
            Direction::InboundToOutbound | Direction::Echo => &self.inbound_messages,
            Direction::OutboundToInbound => &self.outbound_messages,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the last message in either direction.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Messages delivered from the client.
    pub fn inbound_messages(&self) -> u64 {
        self.inbound_messages.load(Ordering::Relaxed)
    }

    /// Messages delivered from the upstream.
    pub fn outbound_messages(&self) -> u64 {
        self.outbound_messages.load(Ordering::Relaxed)
    }

    /// Record `direction` as the one that ended the session.
    ///
    /// Returns `true` if no other pump claimed it first.
    pub fn claim_initiator(&self, direction: Direction) -> bool {
        self.initiator.set(direction).is_ok()
    }

    /// The pump that ended the session, if any did on its own.
    pub fn initiator(&self) -> Option<Direction> {
        self.initiator.get().copied()
    }

    /// Set the reason sent to peers when the session is cancelled. First call wins.
    pub fn set_close_reason(&self, reason: &'static str) {
        let _ = self.close_reason.set(reason);
    }

    /// Reason sent to peers when the session is cancelled.
    pub fn close_reason(&self) -> &'static str {
        self.close_reason.get().copied().unwrap_or(DEFAULT_CLOSE_REASON)
    }
}

impl Default for SessionActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the idle watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogResult {
    /// No traffic for the whole timeout; the session was cancelled.
    TimedOut,
    /// The session ended first.
    Cancelled,
}

/// Cancel `cancel` once the session has been idle for `timeout`.
///
/// Checks four times per timeout window (at least every 10ms apart).
pub async fn run_idle_watchdog(
    activity: &SessionActivity,
    timeout: Duration,
    cancel: CancellationToken,
) -> WatchdogResult {
    let period = (timeout / 4).max(Duration::from_millis(10));
    let mut check = time::interval(period);
    check.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return WatchdogResult::Cancelled,
            _ = check.tick() => {
                if activity.idle_for() >= timeout {
                    activity.set_close_reason("idle timeout");
                    cancel.cancel();
                    return WatchdogResult::TimedOut;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_per_direction() {
        let activity = SessionActivity::new();
        activity.record_delivery(Direction::InboundToOutbound);
        activity.record_delivery(Direction::InboundToOutbound);
        activity.record_delivery(Direction::OutboundToInbound);
        activity.record_delivery(Direction::Echo);
        assert_eq!(activity.inbound_messages(), 3);
        assert_eq!(activity.outbound_messages(), 1);
    }

    #[test]
    fn first_initiator_wins() {
        let activity = SessionActivity::new();
        assert!(activity.initiator().is_none());
        assert!(activity.claim_initiator(Direction::OutboundToInbound));
        assert!(!activity.claim_initiator(Direction::InboundToOutbound));
        assert_eq!(activity.initiator(), Some(Direction::OutboundToInbound));
    }

    #[test]
    fn close_reason_defaults_and_sticks() {
        let activity = SessionActivity::new();
        assert_eq!(activity.close_reason(), "going away");
        activity.set_close_reason("idle timeout");
        activity.set_close_reason("something else");
        assert_eq!(activity.close_reason(), "idle timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_clock() {
        let activity = SessionActivity::new();
        time::advance(Duration::from_secs(3)).await;
        assert!(activity.idle_for() >= Duration::from_secs(3));
        activity.touch();
        assert!(activity.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn watchdog_cancelled() {
        let activity = Arc::new(SessionActivity::new());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let activity2 = activity.clone();

        let handle = tokio::spawn(async move {
            run_idle_watchdog(&activity2, Duration::from_secs(100), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), WatchdogResult::Cancelled);
        assert_eq!(activity.close_reason(), "going away");
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_times_out_when_idle() {
        let activity = SessionActivity::new();
        let cancel = CancellationToken::new();

        let result = run_idle_watchdog(&activity, Duration::from_millis(200), cancel.clone()).await;

        assert_eq!(result, WatchdogResult::TimedOut);
        assert!(cancel.is_cancelled());
        assert_eq!(activity.close_reason(), "idle timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_watchdog_quiet() {
        let activity = Arc::new(SessionActivity::new());
        let cancel = CancellationToken::new();

        let watchdog = {
            let activity = activity.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_idle_watchdog(&activity, Duration::from_millis(200), cancel).await
            })
        };

        for _ in 0..10 {
            time::sleep(Duration::from_millis(100)).await;
            activity.touch();
        }
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        assert_eq!(watchdog.await.unwrap(), WatchdogResult::Cancelled);
    }
}
