//! TLS for inbound and upstream connections.
//!
//! ```text
//! ┌──────────┐   wss (server-side)   ┌─────────┐   wss (client-side)   ┌──────────┐
//! │  Client  │ ───────────────────── │ wsrelay │ ───────────────────── │ Upstream │
//! └──────────┘  optional client cert └─────────┘  optional client cert └──────────┘
//! ```
//!
//! - [`TlsAcceptor`] wraps accepted TCP streams. With a client CA configured
//!   it requires and verifies a client certificate (mutual TLS).
//! - [`TlsConnector`] builds the rustls client config handed to
//!   `tokio-tungstenite` for `wss://` upstreams and for the `send` client.
//!
//! All configs use the `ring` crypto provider and rustls' safe default
//! protocol versions (TLS 1.2 and 1.3).

mod acceptor;
mod connector;
mod error;

pub use acceptor::{TlsAcceptor, TlsServerOptions};
pub use connector::{TlsClientOptions, TlsConnector};
pub use error::{PemContents, TlsError};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// The crypto provider shared by every TLS config built here.
pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Load all certificates from a PEM file (supports chains).
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::certificates(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::certificates(path, e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::certificates(path, "no certificates found in file"));
    }
    Ok(certs)
}

/// Load the first private key (RSA, PKCS8 or EC) from a PEM file.
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::private_key(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::private_key(path, e.to_string()))?
        .ok_or_else(|| TlsError::private_key(path, "no private key found in file"))
}

/// Build a root store from a PEM CA bundle.
pub(crate) fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::certificates(path, e.to_string()))?;
    }
    Ok(roots)
}
