//! Runtime server configuration.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use wsrelay_settings::RelaySettings;

/// Configuration for a [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent connections (`0` = unlimited).
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Close sessions idle for this long.
    pub idle_timeout: Option<Duration>,
    /// Deadline for the TLS + WebSocket handshake.
    pub handshake_timeout: Duration,
    /// How long shutdown waits before abandoning live sessions.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 0,
            max_message_size: 16 * 1024 * 1024,
            idle_timeout: None,
            handshake_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Derive from loaded settings. An unset port takes the TLS mode's
    /// default and a zero idle timeout disables it.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: settings.listen_port(),
            max_connections: server.max_connections,
            max_message_size: server.max_message_size,
            idle_timeout: (server.idle_timeout_ms > 0)
                .then(|| Duration::from_millis(server.idle_timeout_ms)),
            handshake_timeout: Duration::from_millis(server.handshake_timeout_ms),
            shutdown_timeout: Duration::from_millis(server.shutdown_timeout_ms),
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Frame limits for both inbound and upstream WebSockets.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 0);
        assert!(cfg.idle_timeout.is_none());
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn from_default_settings() {
        let cfg = ServerConfig::from_settings(&RelaySettings::default());
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8000);
        assert!(cfg.idle_timeout.is_none());
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn port_from_tls_mode_unless_configured() {
        let mut settings = RelaySettings::default();
        settings.tls.cert_path = Some("server.pem".into());
        assert_eq!(ServerConfig::from_settings(&settings).port, 8001);

        settings.server.port = Some(8000);
        assert_eq!(ServerConfig::from_settings(&settings).port, 8000);
    }

    #[test]
    fn idle_timeout_from_settings() {
        let mut settings = RelaySettings::default();
        settings.server.idle_timeout_ms = 1500;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.idle_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn bind_addr_format() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 8002,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8002");
    }

    #[test]
    fn websocket_limits() {
        let cfg = ServerConfig {
            max_message_size: 1024,
            ..ServerConfig::default()
        };
        let ws = cfg.websocket_config();
        assert_eq!(ws.max_message_size, Some(1024));
        assert_eq!(ws.max_frame_size, Some(1024));
    }
}
