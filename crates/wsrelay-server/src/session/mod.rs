//! Per-connection session core.
//!
//! A session owns its connections for its whole life. Echo runs one pump
//! that reads a connection and writes the same connection. Relay runs two
//! pumps, one per direction, each in its own task:
//!
//! ```text
//!            inbound → outbound pump
//!   client ─────────────────────────────▶ upstream
//!          ◀─────────────────────────────
//!            outbound → inbound pump
//! ```
//!
//! Whichever pump stops first cancels the session token, which stops the
//! other pump, and each pump closes the connection it writes to. A close
//! frame read from one side is the close frame sent to the other.

mod activity;
mod echo;
mod phase;
mod pump;
mod relay;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use wsrelay_core::{ConnectionId, RelayError, Result};

pub use activity::{SessionActivity, WatchdogResult, run_idle_watchdog};
pub use echo::run_echo;
pub use phase::{ConnectionPhase, PhaseTracker};
pub use relay::run_relay;

/// A full-duplex WebSocket message transport.
///
/// Implemented for every `tokio_tungstenite::WebSocketStream`, whatever the
/// underlying byte stream.
pub trait MessageTransport:
    Stream<Item = std::result::Result<Message, WsError>>
    + Sink<Message, Error = WsError>
    + Unpin
    + Send
    + 'static
{
}

impl<T> MessageTransport for T where
    T: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static
{
}

/// Which way a pump copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream.
    InboundToOutbound,
    /// Upstream to client.
    OutboundToInbound,
    /// Client back to itself.
    Echo,
}

impl Direction {
    /// Label used in the `direction` log field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InboundToOutbound => "inbound->outbound",
            Self::OutboundToInbound => "outbound->inbound",
            Self::Echo => "echo",
        }
    }

    fn source_side(self) -> &'static str {
        match self {
            Self::InboundToOutbound | Self::Echo => "inbound",
            Self::OutboundToInbound => "outbound",
        }
    }

    fn sink_side(self) -> &'static str {
        match self {
            Self::OutboundToInbound | Self::Echo => "inbound",
            Self::InboundToOutbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The client closed or disconnected.
    InboundClosed,
    /// The upstream closed or disconnected.
    OutboundClosed,
    /// No message in either direction for the idle timeout.
    IdleTimeout,
    /// The server is shutting down.
    Shutdown,
    /// A read or write failed.
    TransportError,
}

impl EndReason {
    /// snake_case name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InboundClosed => "inbound_closed",
            Self::OutboundClosed => "outbound_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    /// Which side or event ended the session.
    pub reason: EndReason,
    /// Messages read from the client and delivered (upstream or echoed back).
    pub inbound_messages: u64,
    /// Messages read from the upstream and delivered to the client.
    pub outbound_messages: u64,
    /// The failure, when `reason` is [`EndReason::TransportError`].
    pub error: Option<RelayError>,
}

/// Per-session tuning.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Close the session after this long without a message.
    pub idle_timeout: Option<Duration>,
}

/// Identity and lifecycle of one connection.
#[derive(Debug)]
pub struct ConnectionState {
    /// Connection id (shared by the inbound and outbound side of a relay).
    pub id: ConnectionId,
    /// Peer address or URL, for logs.
    pub remote: String,
    /// Lifecycle phase.
    pub phase: PhaseTracker,
}

impl ConnectionState {
    /// New connection in `Connecting`.
    pub fn new(id: ConnectionId, remote: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            remote: remote.into(),
            phase: PhaseTracker::new(),
        })
    }
}

/// An established connection handed to a session.
pub struct Endpoint<T> {
    /// The message transport.
    pub transport: T,
    /// Shared lifecycle state.
    pub state: Arc<ConnectionState>,
}

impl<T: MessageTransport> Endpoint<T> {
    /// Wrap a transport whose handshake just completed, moving it to `Open`.
    pub fn open(transport: T, state: Arc<ConnectionState>) -> Result<Self> {
        state.phase.transition(ConnectionPhase::Open)?;
        Ok(Self { transport, state })
    }
}
