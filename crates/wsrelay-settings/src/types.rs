//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may set any subset of fields and the rest keep their defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use wsrelay_core::constants::{
    DEFAULT_MTLS_PORT, DEFAULT_PORT, DEFAULT_TLS_PORT, DEFAULT_UPSTREAM_URL,
};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8001, "idleTimeoutMs": 60000 },
///   "tls": { "certPath": "server.pem" },
///   "upstream": { "url": "wss://backend:9000" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Inbound TLS settings.
    pub tls: TlsSettings,
    /// Upstream (proxy mode) settings.
    pub upstream: UpstreamSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Port to bind: the configured one, else 8000 for plain WebSocket,
    /// 8001 with TLS and 8002 with mutual TLS.
    pub fn listen_port(&self) -> u16 {
        self.server.port.unwrap_or(if self.tls.mutual() {
            DEFAULT_MTLS_PORT
        } else if self.tls.enabled() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        })
    }
}

/// Listener and per-session limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign). Unset picks the mode default, see
    /// [`RelaySettings::listen_port`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Maximum concurrent connections (`0` = unlimited).
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Close sessions with no traffic for this long (`0` = never).
    pub idle_timeout_ms: u64,
    /// Deadline for the TLS + WebSocket handshake.
    pub handshake_timeout_ms: u64,
    /// How long shutdown waits for live sessions before aborting them.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            max_connections: 0,
            max_message_size: 16 * 1024 * 1024,
            idle_timeout_ms: 0,
            handshake_timeout_ms: 10_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Inbound TLS settings.
///
/// TLS is enabled when `cert_path` is set. When `key_path` is unset the
/// private key is read from the certificate file (combined PEM). Setting
/// `client_ca_path` turns on mutual TLS: clients must present a certificate
/// signed by one of the CAs in that file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSettings {
    /// Server certificate chain (PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// Server private key (PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// CA bundle used to verify client certificates (PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ca_path: Option<PathBuf>,
}

impl TlsSettings {
    /// Whether inbound connections are wrapped in TLS.
    pub fn enabled(&self) -> bool {
        self.cert_path.is_some()
    }

    /// Whether clients must present a certificate.
    pub fn mutual(&self) -> bool {
        self.enabled() && self.client_ca_path.is_some()
    }
}

/// Upstream connection settings (proxy mode only).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Base `ws://` or `wss://` URL of the upstream.
    pub url: String,
    /// CA bundle trusted for `wss://` upstreams (web PKI roots when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<PathBuf>,
    /// Client certificate presented to the upstream (PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for `client_cert_path` (PEM).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<PathBuf>,
    /// Deadline for reaching the upstream.
    pub connect_timeout_ms: u64,
    /// Append the inbound request path to the upstream URL.
    pub forward_path: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
            connect_timeout_ms: 10_000,
            forward_path: true,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, None);
        assert_eq!(s.max_connections, 0);
        assert_eq!(s.max_message_size, 16 * 1024 * 1024);
        assert_eq!(s.idle_timeout_ms, 0);
    }

    #[test]
    fn upstream_defaults() {
        let u = UpstreamSettings::default();
        assert_eq!(u.url, "ws://localhost:8767");
        assert!(u.forward_path);
        assert!(u.ca_path.is_none());
    }

    #[test]
    fn tls_disabled_by_default() {
        let t = TlsSettings::default();
        assert!(!t.enabled());
        assert!(!t.mutual());
    }

    #[test]
    fn tls_mutual_needs_cert_and_ca() {
        let only_ca = TlsSettings {
            client_ca_path: Some("ca.pem".into()),
            ..TlsSettings::default()
        };
        assert!(!only_ca.mutual());

        let both = TlsSettings {
            cert_path: Some("server.pem".into()),
            client_ca_path: Some("ca.pem".into()),
            ..TlsSettings::default()
        };
        assert!(both.enabled());
        assert!(both.mutual());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"server":{"port":8002},"tls":{"certPath":"s.pem"}}"#;
        let s: RelaySettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.server.port, Some(8002));
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.tls.cert_path, Some(PathBuf::from("s.pem")));
        assert_eq!(s.upstream.url, "ws://localhost:8767");
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn listen_port_follows_tls_mode() {
        let mut s = RelaySettings::default();
        assert_eq!(s.listen_port(), 8000);
        s.tls.cert_path = Some("server.pem".into());
        assert_eq!(s.listen_port(), 8001);
        s.tls.client_ca_path = Some("ca.pem".into());
        assert_eq!(s.listen_port(), 8002);
    }

    #[test]
    fn configured_default_port_survives_tls() {
        let json = r#"{"server":{"port":8000},"tls":{"certPath":"s.pem","clientCaPath":"ca.pem"}}"#;
        let s: RelaySettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.listen_port(), 8000);
    }

    #[test]
    fn serializes_camel_case_and_skips_unset_paths() {
        let value = serde_json::to_value(RelaySettings::default()).unwrap();
        assert!(value["server"].get("maxConnections").is_some());
        assert!(value["upstream"].get("forwardPath").is_some());
        assert!(value["tls"].get("certPath").is_none());
        assert!(value["server"].get("port").is_none());
    }
}
