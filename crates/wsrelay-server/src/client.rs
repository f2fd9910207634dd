//! One-shot client: send a text message, return the first reply.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use wsrelay_core::{RelayError, Result};

use crate::tls::TlsConnector;
use crate::upstream::classify_connect_error;

/// Connect to `url` (`ws://` or `wss://`), send `text` and wait for one
/// text or binary reply.
///
/// `tls` supplies the trusted CA and the optional client certificate for
/// `wss://` URLs; it is ignored for `ws://`. The whole exchange is bounded
/// by `timeout`.
pub async fn send_message(
    url: &str,
    text: &str,
    tls: &TlsConnector,
    timeout: Duration,
) -> Result<Message> {
    tokio::time::timeout(timeout, exchange(url, text, tls))
        .await
        .map_err(|_| RelayError::connect(url, format!("no reply within {timeout:?}")))?
}

async fn exchange(url: &str, text: &str, tls: &TlsConnector) -> Result<Message> {
    let (mut ws, _response) =
        tokio_tungstenite::connect_async_tls_with_config(url, None, false, Some(tls.connector()))
            .await
            .map_err(|e| classify_connect_error(url, e))?;
    debug!(%url, "connected");

    ws.send(Message::text(text))
        .await
        .map_err(|e| RelayError::transport("send", e))?;

    let reply = loop {
        match ws.next().await {
            Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => break message,
            Some(Ok(Message::Close(frame))) => {
                let detail = frame.map_or_else(|| "no close frame".to_string(), |f| {
                    format!("{} {}", u16::from(f.code), f.reason)
                });
                return Err(RelayError::transport("recv", format!("closed before reply ({detail})")));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(RelayError::transport("recv", e)),
            None => return Err(RelayError::transport("recv", "connection ended before reply")),
        }
    };

    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "close after reply failed");
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;

    use crate::tls::TlsClientOptions;

    fn connector() -> TlsConnector {
        TlsConnector::new(&TlsClientOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn reply_from_minimal_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Ping first: the client must skip it.
            ws.send(Message::Ping(vec![1u8].into())).await.unwrap();
            if let Some(Ok(msg)) = ws.next().await {
                ws.send(Message::text(format!("got {}", msg.to_text().unwrap())))
                    .await
                    .unwrap();
            }
            let _ = ws.next().await;
        });

        let reply = send_message(
            &format!("ws://{addr}"),
            "Waffles",
            &connector(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(reply, Message::text("got Waffles"));
    }

    #[tokio::test]
    async fn close_before_reply_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let err = send_message(&format!("ws://{addr}"), "hi", &connector(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_matches!(err, RelayError::Transport { .. });
    }

    #[tokio::test]
    async fn refused_connection_is_connect_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = send_message(
            &format!("ws://127.0.0.1:{port}"),
            "hi",
            &connector(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_matches!(err, RelayError::ConnectFailure { .. });
    }
}
