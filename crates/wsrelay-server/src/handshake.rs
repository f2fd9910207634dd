//! Inbound WebSocket upgrade.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use wsrelay_core::{RelayError, Result};

/// What the client sent with its upgrade request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Request path including the query, e.g. `/chat?room=1`.
    pub path: String,
    /// `Origin` header, if present.
    pub origin: Option<String>,
    /// Whether a `Cookie` header was sent.
    pub has_cookie: bool,
}

impl HandshakeInfo {
    /// Extract the fields from an upgrade request.
    pub fn from_request(request: &Request) -> Self {
        let path = request
            .uri()
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());
        let origin = request
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            path,
            origin,
            has_cookie: request.headers().contains_key("cookie"),
        }
    }
}

/// Complete the server side of the WebSocket handshake on `stream`.
///
/// No header changes behavior; they are only recorded for logging.
pub async fn accept_websocket<S>(
    stream: S,
    config: WebSocketConfig,
) -> Result<(WebSocketStream<S>, HandshakeInfo)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut info = HandshakeInfo::default();
    let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        info = HandshakeInfo::from_request(request);
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config))
        .await
        .map_err(|e| RelayError::Handshake(e.to_string()))?;
    Ok((ws, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::AsyncWriteExt;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    #[test]
    fn info_from_request() {
        let mut request = "ws://localhost:8000/chat?room=1".into_client_request().unwrap();
        let headers = request.headers_mut();
        let _ = headers.insert("origin", "https://example.com".parse().unwrap());
        let _ = headers.insert("cookie", "session=abc".parse().unwrap());

        let info = HandshakeInfo::from_request(&request);
        assert_eq!(info.path, "/chat?room=1");
        assert_eq!(info.origin.as_deref(), Some("https://example.com"));
        assert!(info.has_cookie);
    }

    #[test]
    fn info_without_optional_headers() {
        let request = "ws://localhost:8000/".into_client_request().unwrap();
        let info = HandshakeInfo::from_request(&request);
        assert_eq!(info.path, "/");
        assert!(info.origin.is_none());
        assert!(!info.has_cookie);
    }

    #[tokio::test]
    async fn accepts_client_and_captures_path() {
        let (server_io, client_io) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(accept_websocket(server_io, WebSocketConfig::default()));

        let (_client_ws, _resp) =
            tokio_tungstenite::client_async("ws://localhost/feed?x=1", client_io)
                .await
                .unwrap();

        let (_ws, info) = server.await.unwrap().unwrap();
        assert_eq!(info.path, "/feed?x=1");
    }

    #[tokio::test]
    async fn garbage_is_a_handshake_error() {
        let (server_io, mut client_io) = tokio::io::duplex(1024);
        let server = tokio::spawn(accept_websocket(server_io, WebSocketConfig::default()));

        client_io
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let err = server.await.unwrap().err().unwrap();
        assert_matches!(err, RelayError::Handshake(_));
    }
}
