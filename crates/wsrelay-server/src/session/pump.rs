//! One-directional message copy loop.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use wsrelay_core::RelayError;

use super::{ConnectionState, Direction, SessionActivity};

/// Upper bound on sending the close frame and flushing the sink.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a pump stopped.
#[derive(Debug)]
pub(crate) enum PumpOutcome {
    /// The source sent a close frame or ended.
    SourceClosed,
    /// Reading the source failed.
    SourceFailed(RelayError),
    /// Writing the sink failed.
    SinkFailed(RelayError),
    /// The session token was cancelled.
    Cancelled,
}

/// Copies messages from `source` to `sink` until either side stops or the
/// session is cancelled, then cancels the session and closes `sink`.
pub(crate) struct Pump<S, K> {
    pub direction: Direction,
    pub source: S,
    pub sink: K,
    /// Lifecycle of the connection `sink` writes to.
    pub sink_state: Arc<ConnectionState>,
    pub activity: Arc<SessionActivity>,
    pub cancel: CancellationToken,
}

impl<S, K> Pump<S, K>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    K: Sink<Message, Error = WsError> + Unpin,
{
    pub(crate) async fn run(mut self) -> PumpOutcome {
        let direction = self.direction;
        let (outcome, close_frame) = self.copy().await;

        if !matches!(outcome, PumpOutcome::Cancelled) && self.activity.claim_initiator(direction) {
            debug!(direction = %direction, outcome = ?outcome, "pump ended session");
        }
        self.cancel.cancel();

        let close_frame = close_frame.or_else(|| {
            Some(CloseFrame {
                code: CloseCode::Away,
                reason: self.activity.close_reason().into(),
            })
        });
        self.close_sink(close_frame).await;
        outcome
    }

    /// The copy loop. Returns the outcome and, when the source said why it
    /// stopped, the close frame to pass on.
    async fn copy(&mut self) -> (PumpOutcome, Option<CloseFrame>) {
        let direction = self.direction;
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return (PumpOutcome::Cancelled, None),
                next = self.source.next() => next,
            };

            let message = match next {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => message,
                Some(Ok(Message::Close(frame))) => {
                    debug!(direction = %direction, frame = ?frame, "close frame received");
                    let frame = frame.or(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    }));
                    return (PumpOutcome::SourceClosed, frame);
                }
                // Ping/pong are answered per hop by the transport.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let err = RelayError::transport(format!("{} recv", direction.source_side()), e);
                    let frame = CloseFrame {
                        code: CloseCode::Error,
                        reason: "peer connection failed".into(),
                    };
                    return (PumpOutcome::SourceFailed(err), Some(frame));
                }
                None => {
                    let frame = CloseFrame {
                        code: CloseCode::Away,
                        reason: "peer disconnected".into(),
                    };
                    return (PumpOutcome::SourceClosed, Some(frame));
                }
            };

            self.activity.touch();
            trace!(direction = %direction, bytes = message.len(), "forwarding message");

            let sent = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return (PumpOutcome::Cancelled, None),
                sent = self.sink.send(message) => sent,
            };
            if let Err(e) = sent {
                let err = RelayError::transport(format!("{} send", direction.sink_side()), e);
                return (PumpOutcome::SinkFailed(err), None);
            }
            self.activity.record_delivery(direction);
        }
    }

    /// Send the close frame and flush, bounded by [`CLOSE_TIMEOUT`].
    ///
    /// Failures are expected here (the peer may already be gone) and only
    /// logged at trace.
    async fn close_sink(&mut self, frame: Option<CloseFrame>) {
        let state = Arc::clone(&self.sink_state);
        if !state.phase.begin_close() {
            return;
        }

        let close = async {
            if let Err(e) = self.sink.send(Message::Close(frame)).await {
                trace!(side = self.direction.sink_side(), error = %e, "close frame not sent");
            }
            if let Err(e) = self.sink.close().await {
                trace!(side = self.direction.sink_side(), error = %e, "sink close failed");
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
            debug!(side = self.direction.sink_side(), "close abandoned after timeout");
        }

        state.phase.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionPhase;
    use crate::session::test_support::endpoint_pair;
    use assert_matches::assert_matches;
    use tokio_tungstenite::tungstenite::protocol::Role;

    #[tokio::test]
    async fn copies_until_close_and_forwards_frame() {
        let (endpoint, mut client) = endpoint_pair(Role::Server, "client").await;
        let (_in_sink, source_stream) = endpoint.transport.split();
        let (outbound, mut upstream) = endpoint_pair(Role::Client, "upstream").await;
        let (out_sink, _out_stream) = outbound.transport.split();

        let activity = Arc::new(SessionActivity::new());
        let cancel = CancellationToken::new();
        let pump = Pump {
            direction: Direction::InboundToOutbound,
            source: source_stream,
            sink: out_sink,
            sink_state: outbound.state.clone(),
            activity: activity.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(pump.run());

        client.send(Message::text("one")).await.unwrap();
        client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
        assert_eq!(upstream.next().await.unwrap().unwrap(), Message::text("one"));
        assert_eq!(
            upstream.next().await.unwrap().unwrap(),
            Message::binary(vec![1u8, 2, 3])
        );

        client
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            })))
            .await
            .unwrap();

        let outcome = handle.await.unwrap();
        assert_matches!(outcome, PumpOutcome::SourceClosed);
        assert!(cancel.is_cancelled());
        assert_eq!(activity.inbound_messages(), 2);
        assert_eq!(activity.initiator(), Some(Direction::InboundToOutbound));
        assert_eq!(outbound.state.phase.get(), ConnectionPhase::Closed);

        let close = upstream.next().await.unwrap().unwrap();
        assert_matches!(close, Message::Close(Some(ref f)) if f.code == CloseCode::Normal && f.reason == "bye");
    }

    #[tokio::test]
    async fn cancellation_closes_sink_with_session_reason() {
        let (inbound, _client) = endpoint_pair(Role::Server, "client").await;
        let (_in_sink, in_stream) = inbound.transport.split();
        let (outbound, mut upstream) = endpoint_pair(Role::Client, "upstream").await;
        let (out_sink, _out_stream) = outbound.transport.split();

        let activity = Arc::new(SessionActivity::new());
        activity.set_close_reason("idle timeout");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Pump {
                direction: Direction::InboundToOutbound,
                source: in_stream,
                sink: out_sink,
                sink_state: outbound.state.clone(),
                activity: activity.clone(),
                cancel: cancel.clone(),
            }
            .run(),
        );

        cancel.cancel();
        assert_matches!(handle.await.unwrap(), PumpOutcome::Cancelled);
        assert!(activity.initiator().is_none());

        let close = upstream.next().await.unwrap().unwrap();
        assert_matches!(close, Message::Close(Some(ref f)) if f.code == CloseCode::Away && f.reason == "idle timeout");
    }

    #[tokio::test]
    async fn source_disconnect_is_source_closed() {
        let (inbound, client) = endpoint_pair(Role::Server, "client").await;
        let (_in_sink, in_stream) = inbound.transport.split();
        let (outbound, _upstream) = endpoint_pair(Role::Client, "upstream").await;
        let (out_sink, _out_stream) = outbound.transport.split();

        let handle = tokio::spawn(
            Pump {
                direction: Direction::InboundToOutbound,
                source: in_stream,
                sink: out_sink,
                sink_state: outbound.state.clone(),
                activity: Arc::new(SessionActivity::new()),
                cancel: CancellationToken::new(),
            }
            .run(),
        );

        drop(client);
        let outcome = handle.await.unwrap();
        assert_matches!(outcome, PumpOutcome::SourceClosed | PumpOutcome::SourceFailed(_));
    }
}
