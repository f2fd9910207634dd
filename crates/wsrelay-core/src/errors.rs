//! Error hierarchy for wsrelay.
//!
//! [`RelayError`] splits into two groups:
//!
//! - **Startup errors** ([`RelayError::Bind`], [`RelayError::Tls`],
//!   [`RelayError::InvalidUpstream`]) abort the process.
//! - **Session errors** (everything else) end one connection only and are
//!   reported through logging.

use thiserror::Error;

/// Top-level error type for wsrelay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream endpoint could not be reached; the session never started.
    #[error("failed to connect to upstream {upstream}: {reason}")]
    ConnectFailure {
        /// Upstream URL that was dialed.
        upstream: String,
        /// Underlying failure.
        reason: String,
    },

    /// Mid-session read or write failure.
    #[error("transport error ({context}): {message}")]
    Transport {
        /// Which side or operation failed (e.g. `"inbound recv"`).
        context: String,
        /// Underlying failure.
        message: String,
    },

    /// The TLS handshake was rejected (untrusted or missing certificate).
    #[error("TLS verification failed: {0}")]
    TlsVerification(String),

    /// The WebSocket upgrade failed or timed out.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// The listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Certificates or keys could not be loaded, or the TLS config is invalid.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The configured upstream URL is unusable.
    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUpstream {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A connection tried to move to a phase it cannot reach from its current one.
    #[error("invalid connection phase transition {from} -> {to}")]
    InvalidTransition {
        /// Current phase.
        from: String,
        /// Requested phase.
        to: String,
    },
}

impl RelayError {
    /// Build a [`RelayError::Transport`].
    pub fn transport(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Build a [`RelayError::ConnectFailure`].
    pub fn connect(upstream: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectFailure {
            upstream: upstream.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`RelayError::InvalidUpstream`].
    pub fn invalid_upstream(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUpstream {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Machine-readable error kind, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailure { .. } => "connect_failure",
            Self::Transport { .. } => "transport",
            Self::TlsVerification(_) => "tls_verification",
            Self::Handshake(_) => "handshake",
            Self::Bind { .. } => "bind",
            Self::Tls(_) => "tls",
            Self::InvalidUpstream { .. } => "invalid_upstream",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Whether this error must abort the whole process.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::Tls(_) | Self::InvalidUpstream { .. }
        )
    }
}

/// Result type for wsrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
