//! Server-side TLS: upgrades accepted TCP streams, optionally requiring a
//! client certificate.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::server::WebPkiClientVerifier;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use wsrelay_settings::TlsSettings;

use super::{TlsError, load_certificates, load_private_key, load_root_store, provider};

/// Paths for the server certificate, its key and the optional client CA.
#[derive(Clone, Debug, Default)]
pub struct TlsServerOptions {
    /// Server certificate chain (PEM).
    pub cert_path: PathBuf,
    /// Private key; read from `cert_path` when `None` (combined PEM).
    pub key_path: Option<PathBuf>,
    /// Client CA bundle; when set, clients must present a certificate it signed.
    pub client_ca_path: Option<PathBuf>,
}

impl TlsServerOptions {
    /// Options from settings, or `None` when inbound TLS is disabled.
    pub fn from_settings(settings: &TlsSettings) -> Option<Self> {
        settings.cert_path.as_ref().map(|cert| Self {
            cert_path: cert.clone(),
            key_path: settings.key_path.clone(),
            client_ca_path: settings.client_ca_path.clone(),
        })
    }
}

/// TLS acceptor for inbound connections.
///
/// ```ignore
/// let acceptor = TlsAcceptor::new(&TlsServerOptions {
///     cert_path: "server.pem".into(),
///     key_path: None,
///     client_ca_path: Some("clients.pem".into()),
/// })?;
/// let tls_stream = acceptor.accept(tcp_stream).await?;
/// ```
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
    mutual: bool,
}

impl TlsAcceptor {
    /// Load certificates and build the acceptor.
    ///
    /// Fails if any file cannot be read or parsed, or if rustls rejects the
    /// certificate/key pair.
    pub fn new(options: &TlsServerOptions) -> Result<Self, TlsError> {
        let certs = load_certificates(&options.cert_path)?;
        let key_path = options.key_path.as_ref().unwrap_or(&options.cert_path);
        let key = load_private_key(key_path)?;

        let builder = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("failed to set protocol versions: {e}")))?;

        let builder = match &options.client_ca_path {
            Some(ca_path) => {
                let roots = load_root_store(ca_path)?;
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
                        .build()
                        .map_err(|e| {
                            TlsError::config(format!("failed to build client verifier: {e}"))
                        })?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let server_config = builder
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::config(format!("failed to build TLS config: {e}")))?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
            mutual: options.client_ca_path.is_some(),
        })
    }

    /// Whether clients must present a certificate.
    pub fn is_mutual(&self) -> bool {
        self.mutual
    }

    /// Perform the TLS handshake on an accepted stream.
    ///
    /// Certificate failures come back as [`TlsError::Verification`].
    pub async fn accept<S>(&self, stream: S) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::from_handshake(&e))
    }
}
