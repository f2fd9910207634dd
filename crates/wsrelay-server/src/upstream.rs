//! Outbound connections to the proxied upstream.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use wsrelay_core::{RelayError, Result};
use wsrelay_settings::UpstreamSettings;

use crate::tls::{TlsClientOptions, TlsConnector, TlsError};

/// WebSocket stream to the upstream.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolves and dials the upstream for each inbound connection.
pub struct Upstream {
    url: String,
    forward_path: bool,
    connect_timeout: Duration,
    ws_config: WebSocketConfig,
    tls: TlsConnector,
}

impl Upstream {
    /// Validate the URL and build the TLS client config.
    ///
    /// Errors here are startup errors: a bad URL is
    /// [`RelayError::InvalidUpstream`], unreadable certificates are
    /// [`RelayError::Tls`].
    pub fn new(settings: &UpstreamSettings, ws_config: WebSocketConfig) -> Result<Self> {
        validate_url(&settings.url)?;
        let tls = TlsConnector::new(&TlsClientOptions::from_settings(settings))?;
        Ok(Self {
            url: settings.url.clone(),
            forward_path: settings.forward_path,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            ws_config,
            tls,
        })
    }

    /// The configured base URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL to dial for an inbound request to `path`.
    ///
    /// `ws://host:8767` + `/chat?room=1` gives `ws://host:8767/chat?room=1`.
    /// An empty or root path, or disabled forwarding, gives the base URL.
    pub fn target_url(&self, path: &str) -> String {
        if !self.forward_path || path.is_empty() || path == "/" {
            return self.url.clone();
        }
        let base = self.url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Dial the upstream for an inbound request to `path`.
    ///
    /// Returns the stream and the URL that was dialed.
    pub async fn connect(&self, path: &str) -> Result<(UpstreamStream, String)> {
        let url = self.target_url(path);
        debug!(upstream = %url, "connecting to upstream");

        let dial = tokio_tungstenite::connect_async_tls_with_config(
            url.as_str(),
            Some(self.ws_config),
            false,
            Some(self.tls.connector()),
        );
        match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok((stream, _response))) => Ok((stream, url)),
            Ok(Err(e)) => Err(classify_connect_error(&url, e)),
            Err(_) => Err(RelayError::connect(
                url,
                format!("timed out after {:?}", self.connect_timeout),
            )),
        }
    }
}

fn validate_url(url: &str) -> Result<()> {
    let uri: Uri = url
        .parse()
        .map_err(|e| RelayError::invalid_upstream(url, format!("{e}")))?;
    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        Some(other) => {
            return Err(RelayError::invalid_upstream(
                url,
                format!("scheme must be ws or wss, got {other}"),
            ));
        }
        None => return Err(RelayError::invalid_upstream(url, "missing scheme")),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(RelayError::invalid_upstream(url, "missing host"));
    }
    Ok(())
}

/// Certificate rejections become [`RelayError::TlsVerification`]; everything
/// else is a [`RelayError::ConnectFailure`].
pub(crate) fn classify_connect_error(url: &str, err: WsError) -> RelayError {
    if let WsError::Io(io) = &err {
        if let TlsError::Verification(reason) = TlsError::from_handshake(io) {
            return RelayError::TlsVerification(reason);
        }
    }
    RelayError::connect(url, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn upstream(url: &str, forward_path: bool) -> Upstream {
        let settings = UpstreamSettings {
            url: url.to_string(),
            forward_path,
            connect_timeout_ms: 2_000,
            ..UpstreamSettings::default()
        };
        Upstream::new(&settings, WebSocketConfig::default()).unwrap()
    }

    #[test]
    fn appends_path_and_query() {
        let up = upstream("ws://localhost:8767", true);
        assert_eq!(up.target_url("/chat?room=1"), "ws://localhost:8767/chat?room=1");
    }

    #[test]
    fn root_path_keeps_base() {
        let up = upstream("ws://localhost:8767", true);
        assert_eq!(up.target_url("/"), "ws://localhost:8767");
        assert_eq!(up.target_url(""), "ws://localhost:8767");
    }

    #[test]
    fn base_with_trailing_slash_and_prefix() {
        let up = upstream("wss://backend.example/api/", true);
        assert_eq!(up.target_url("/feed"), "wss://backend.example/api/feed");
    }

    #[test]
    fn forwarding_disabled() {
        let up = upstream("ws://localhost:8767", false);
        assert_eq!(up.target_url("/chat"), "ws://localhost:8767");
    }

    #[test]
    fn rejects_http_scheme() {
        let settings = UpstreamSettings {
            url: "http://localhost:8767".into(),
            ..UpstreamSettings::default()
        };
        let err = Upstream::new(&settings, WebSocketConfig::default()).err().unwrap();
        assert_matches!(err, RelayError::InvalidUpstream { .. });
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_unparseable_url() {
        assert_matches!(validate_url("ws://"), Err(RelayError::InvalidUpstream { .. }));
        assert_matches!(validate_url("not a url"), Err(RelayError::InvalidUpstream { .. }));
    }

    #[test]
    fn accepts_ws_and_wss() {
        assert!(validate_url("ws://127.0.0.1:9000").is_ok());
        assert!(validate_url("wss://relay.example/path").is_ok());
    }

    #[test]
    fn bad_ca_is_tls_error() {
        let settings = UpstreamSettings {
            ca_path: Some("/nonexistent/ca.pem".into()),
            ..UpstreamSettings::default()
        };
        let err = Upstream::new(&settings, WebSocketConfig::default()).err().unwrap();
        assert_matches!(err, RelayError::Tls(_));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_connect_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let up = upstream(&format!("ws://127.0.0.1:{port}"), true);
        let err = up.connect("/").await.err().unwrap();
        assert_matches!(err, RelayError::ConnectFailure { .. });
    }

    #[test]
    fn plain_io_error_is_connect_failure() {
        let err = classify_connect_error(
            "ws://x",
            WsError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")),
        );
        assert_matches!(err, RelayError::ConnectFailure { .. });
    }

    #[test]
    fn certificate_rejection_is_tls_verification() {
        let io = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        let err = classify_connect_error("wss://x", WsError::Io(io));
        assert_matches!(err, RelayError::TlsVerification(_));
    }
}
