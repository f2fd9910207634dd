//! Errors raised while building TLS configs and running handshakes.

use std::fmt;
use std::path::PathBuf;

use rustls::AlertDescription;
use thiserror::Error;
use wsrelay_core::RelayError;

/// What a PEM file was expected to hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PemContents {
    /// One or more certificates.
    Certificates,
    /// A single private key.
    PrivateKey,
}

impl fmt::Display for PemContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Certificates => "certificates",
            Self::PrivateKey => "private key",
        })
    }
}

/// TLS failures. Setup errors stop the server; handshake errors end one
/// connection.
#[derive(Error, Debug)]
pub enum TlsError {
    /// A PEM file could not be opened or held nothing usable.
    #[error("cannot load {contents} from {}: {reason}", path.display())]
    Pem {
        /// What the file should have held.
        contents: PemContents,
        /// File that was read.
        path: PathBuf,
        /// Why it was unusable.
        reason: String,
    },

    /// Loaded material that rustls refused to assemble into a config.
    #[error("invalid TLS setup: {0}")]
    Config(String),

    /// The peer sent no certificate, or one we do not trust.
    #[error("certificate rejected: {0}")]
    Verification(String),

    /// Any other handshake failure.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
}

impl TlsError {
    /// Certificate file `path` was unusable.
    pub fn certificates(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::pem(PemContents::Certificates, path, reason)
    }

    /// Private key file `path` was unusable.
    pub fn private_key(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::pem(PemContents::PrivateKey, path, reason)
    }

    /// rustls rejected the assembled config.
    pub fn config(reason: impl fmt::Display) -> Self {
        Self::Config(reason.to_string())
    }

    fn pem(contents: PemContents, path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Pem {
            contents,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Sort a failed handshake into [`Verification`](Self::Verification) or
    /// [`Handshake`](Self::Handshake).
    ///
    /// tokio-rustls hands back an `io::Error`; when it wraps a
    /// [`rustls::Error`] about certificates, on either side of the
    /// connection, the failure is a verification one.
    pub fn from_handshake(err: &std::io::Error) -> Self {
        let Some(cause) = rustls_cause(err) else {
            return Self::Handshake(err.to_string());
        };
        if rejects_certificate(cause) {
            Self::Verification(cause.to_string())
        } else {
            Self::Handshake(cause.to_string())
        }
    }

    /// Fatal errors stop the server from starting; the rest end one session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Pem { .. } | Self::Config(_))
    }
}

/// The rustls error inside an I/O error, if any.
pub(crate) fn rustls_cause(err: &std::io::Error) -> Option<&rustls::Error> {
    err.get_ref()?.downcast_ref()
}

fn rejects_certificate(err: &rustls::Error) -> bool {
    match err {
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => true,
        rustls::Error::AlertReceived(alert) => matches!(
            alert,
            AlertDescription::BadCertificate
                | AlertDescription::UnknownCA
                | AlertDescription::CertificateRequired
                | AlertDescription::CertificateUnknown
        ),
        _ => false,
    }
}

impl From<TlsError> for RelayError {
    fn from(err: TlsError) -> Self {
        if err.is_fatal() {
            return Self::Tls(err.to_string());
        }
        match err {
            TlsError::Verification(reason) => Self::TlsVerification(reason),
            other => Self::Handshake(other.to_string()),
        }
    }
}
