//! Echo session: every message goes straight back to its sender.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::activity::{SessionActivity, WatchdogResult, run_idle_watchdog};
use super::pump::{Pump, PumpOutcome};
use super::{Direction, EndReason, Endpoint, MessageTransport, SessionOptions, SessionSummary};

/// Echo text and binary messages back on `endpoint` until it closes, fails,
/// goes idle or `cancel` fires.
///
/// One message at a time: the next read starts only after the previous echo
/// was written.
pub async fn run_echo<T: MessageTransport>(
    endpoint: Endpoint<T>,
    options: SessionOptions,
    cancel: CancellationToken,
) -> SessionSummary {
    let session = cancel.child_token();
    let activity = Arc::new(SessionActivity::new());
    let (sink, source) = endpoint.transport.split();

    let pump = Pump {
        direction: Direction::Echo,
        source,
        sink,
        sink_state: Arc::clone(&endpoint.state),
        activity: Arc::clone(&activity),
        cancel: session.clone(),
    };
    let watchdog = async {
        match options.idle_timeout {
            Some(timeout) => run_idle_watchdog(&activity, timeout, session.clone()).await,
            None => WatchdogResult::Cancelled,
        }
    };

    let (outcome, watchdog) = tokio::join!(pump.run(), watchdog);

    let (reason, error) = match (outcome, watchdog) {
        (PumpOutcome::SourceClosed, _) => (EndReason::InboundClosed, None),
        (PumpOutcome::SourceFailed(e) | PumpOutcome::SinkFailed(e), _) => {
            (EndReason::TransportError, Some(e))
        }
        (PumpOutcome::Cancelled, WatchdogResult::TimedOut) => (EndReason::IdleTimeout, None),
        (PumpOutcome::Cancelled, WatchdogResult::Cancelled) => (EndReason::Shutdown, None),
    };

    let summary = SessionSummary {
        reason,
        inbound_messages: activity.inbound_messages(),
        outbound_messages: 0,
        error,
    };
    info!(
        reason = %summary.reason,
        echoed = summary.inbound_messages,
        "echo session ended"
    );
    summary
}
