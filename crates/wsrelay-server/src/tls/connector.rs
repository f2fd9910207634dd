//! Client-side TLS for `wss://` upstreams and the `send` client.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use tokio_tungstenite::Connector;
use wsrelay_settings::UpstreamSettings;

use super::{TlsError, load_certificates, load_private_key, load_root_store, provider};

/// Trust anchors and optional client identity for outgoing TLS.
#[derive(Clone, Debug, Default)]
pub struct TlsClientOptions {
    /// CA bundle to trust; the web PKI roots when `None`.
    pub ca_path: Option<PathBuf>,
    /// Client certificate chain presented to the server.
    pub client_cert_path: Option<PathBuf>,
    /// Private key for `client_cert_path`.
    pub client_key_path: Option<PathBuf>,
}

impl TlsClientOptions {
    /// Options for dialing the upstream.
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            ca_path: settings.ca_path.clone(),
            client_cert_path: settings.client_cert_path.clone(),
            client_key_path: settings.client_key_path.clone(),
        }
    }
}

/// Rustls client configuration wrapped for `tokio-tungstenite`.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
}

impl TlsConnector {
    /// Build the client config.
    ///
    /// A client certificate without a key (or the reverse) is a config error.
    pub fn new(options: &TlsClientOptions) -> Result<Self, TlsError> {
        let roots = match &options.ca_path {
            Some(path) => load_root_store(path)?,
            None => RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
        };

        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("failed to set protocol versions: {e}")))?
            .with_root_certificates(roots);

        let config = match (&options.client_cert_path, &options.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certificates(cert_path)?;
                let key = load_private_key(key_path)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| TlsError::config(format!("invalid client certificate: {e}")))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(TlsError::config(
                    "client certificate and key must be configured together",
                ));
            }
        };

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Connector handed to `connect_async_tls_with_config`.
    pub fn connector(&self) -> Connector {
        Connector::Rustls(Arc::clone(&self.config))
    }
}
