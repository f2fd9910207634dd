//! Connection lifecycle: `Connecting → Open → Closing → Closed`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use wsrelay_core::{RelayError, Result};

/// Lifecycle phase of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionPhase {
    /// TCP accepted or dialed; TLS/WebSocket handshake in progress.
    Connecting = 0,
    /// Handshake done; messages flow.
    Open = 1,
    /// A close was started; no new messages are forwarded.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl ConnectionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase name, used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Whether `self → next` is a legal step.
    ///
    /// A handshake failure may skip straight from `Connecting` to `Closing`
    /// or `Closed`; an open connection always passes through `Closing`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open | Self::Closing | Self::Closed)
                | (Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free phase cell shared between a connection's reader and writer.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: AtomicU8,
}

impl PhaseTracker {
    /// Start in `Connecting`.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(ConnectionPhase::Connecting as u8),
        }
    }

    /// Current phase.
    pub fn get(&self) -> ConnectionPhase {
        ConnectionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move to `next`, rejecting illegal or backward steps.
    pub fn transition(&self, next: ConnectionPhase) -> Result<()> {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            let from = ConnectionPhase::from_u8(current);
            if !from.can_transition_to(next) {
                return Err(RelayError::InvalidTransition {
                    from: from.to_string(),
                    to: next.to_string(),
                });
            }
            match self.phase.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Enter `Closing`. Returns `true` only for the caller that made the move.
    pub fn begin_close(&self) -> bool {
        self.transition(ConnectionPhase::Closing).is_ok()
    }

    /// Enter `Closed` from `Closing` (or `Connecting`). No-op once closed.
    pub fn mark_closed(&self) {
        let _ = self.transition(ConnectionPhase::Closed);
    }

    /// Whether messages may still be forwarded.
    pub fn is_open(&self) -> bool {
        self.get() == ConnectionPhase::Open
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
