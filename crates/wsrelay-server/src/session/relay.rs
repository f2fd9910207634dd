//! Relay session: two pumps between an inbound and an outbound connection.

use std::sync::Arc;

use futures::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, info, warn};
use wsrelay_core::RelayError;

use super::activity::{SessionActivity, WatchdogResult, run_idle_watchdog};
use super::pump::{Pump, PumpOutcome};
use super::{Direction, EndReason, Endpoint, MessageTransport, SessionOptions, SessionSummary};

/// Relay messages between `inbound` and `outbound` until either side stops.
///
/// Each direction runs in its own task. When one stops (close, error, failed
/// send) the other is cancelled and both connections are closed; the function
/// returns only after both tasks have exited.
pub async fn run_relay<I, O>(
    inbound: Endpoint<I>,
    outbound: Endpoint<O>,
    options: SessionOptions,
    cancel: CancellationToken,
) -> SessionSummary
where
    I: MessageTransport,
    O: MessageTransport,
{
    let session = cancel.child_token();
    let activity = Arc::new(SessionActivity::new());

    let (inbound_sink, inbound_source) = inbound.transport.split();
    let (outbound_sink, outbound_source) = outbound.transport.split();

    let upstream_pump = spawn_pump(Pump {
        direction: Direction::InboundToOutbound,
        source: inbound_source,
        sink: outbound_sink,
        sink_state: Arc::clone(&outbound.state),
        activity: Arc::clone(&activity),
        cancel: session.clone(),
    });
    let downstream_pump = spawn_pump(Pump {
        direction: Direction::OutboundToInbound,
        source: outbound_source,
        sink: inbound_sink,
        sink_state: Arc::clone(&inbound.state),
        activity: Arc::clone(&activity),
        cancel: session.clone(),
    });

    let watchdog = async {
        match options.idle_timeout {
            Some(timeout) => run_idle_watchdog(&activity, timeout, session.clone()).await,
            None => WatchdogResult::Cancelled,
        }
    };

    let (upstream, downstream, watchdog) =
        tokio::join!(join_pump(upstream_pump), join_pump(downstream_pump), watchdog);

    let (reason, error) = match activity.initiator() {
        Some(Direction::InboundToOutbound) => classify(upstream, EndReason::InboundClosed),
        Some(Direction::OutboundToInbound) => classify(downstream, EndReason::OutboundClosed),
        _ if watchdog == WatchdogResult::TimedOut => (EndReason::IdleTimeout, None),
        _ => (EndReason::Shutdown, None),
    };

    let summary = SessionSummary {
        reason,
        inbound_messages: activity.inbound_messages(),
        outbound_messages: activity.outbound_messages(),
        error,
    };
    match &summary.error {
        Some(err) => warn!(
            reason = %summary.reason,
            error_kind = err.kind(),
            error = %err,
            to_upstream = summary.inbound_messages,
            to_client = summary.outbound_messages,
            "relay session ended"
        ),
        None => info!(
            reason = %summary.reason,
            to_upstream = summary.inbound_messages,
            to_client = summary.outbound_messages,
            "relay session ended"
        ),
    }
    summary
}

/// Pumps are aborted if the session task itself is dropped.
fn spawn_pump<S, K>(pump: Pump<S, K>) -> AbortOnDropHandle<PumpOutcome>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
    K: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    let span = tracing::debug_span!("pump", direction = %pump.direction);
    AbortOnDropHandle::new(tokio::spawn(pump.run().instrument(span)))
}

/// A pump task that panicked counts as cancelled; its peer still gets closed.
async fn join_pump(handle: AbortOnDropHandle<PumpOutcome>) -> PumpOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "pump task failed");
            PumpOutcome::Cancelled
        }
    }
}

fn classify(outcome: PumpOutcome, closed: EndReason) -> (EndReason, Option<RelayError>) {
    match outcome {
        PumpOutcome::SourceClosed => (closed, None),
        PumpOutcome::SourceFailed(e) | PumpOutcome::SinkFailed(e) => {
            (EndReason::TransportError, Some(e))
        }
        PumpOutcome::Cancelled => (EndReason::Shutdown, None),
    }
}
