//! Defaults shared by the settings crate and the binary.

/// Crate version, printed in the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen port for the plain echo service and the proxy.
pub const DEFAULT_PORT: u16 = 8000;

/// Default listen port for the TLS echo service.
pub const DEFAULT_TLS_PORT: u16 = 8001;

/// Default listen port for the mutual-TLS echo service.
pub const DEFAULT_MTLS_PORT: u16 = 8002;

/// Default upstream the proxy forwards to.
pub const DEFAULT_UPSTREAM_URL: &str = "ws://localhost:8767";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_are_distinct() {
        assert_ne!(DEFAULT_PORT, DEFAULT_TLS_PORT);
        assert_ne!(DEFAULT_TLS_PORT, DEFAULT_MTLS_PORT);
        assert_ne!(DEFAULT_PORT, DEFAULT_MTLS_PORT);
    }

    #[test]
    fn default_upstream_is_websocket_url() {
        assert!(DEFAULT_UPSTREAM_URL.starts_with("ws://"));
    }
}
