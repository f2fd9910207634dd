//! `RelayServer`: TCP listener, optional TLS, one session task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use wsrelay_core::{ConnectionId, RelayError, Result};
use wsrelay_settings::RelaySettings;

use crate::config::ServerConfig;
use crate::handshake::accept_websocket;
use crate::session::{
    ConnectionState, EndReason, Endpoint, SessionOptions, SessionSummary, run_echo, run_relay,
};
use crate::shutdown::SessionTracker;
use crate::tls::{TlsAcceptor, TlsServerOptions};
use crate::upstream::Upstream;

/// Back-off after a failed `accept()` (e.g. out of file descriptors).
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// What each accepted connection is served with.
#[derive(Clone)]
pub enum ServiceMode {
    /// Send every message back to its sender.
    Echo,
    /// Relay every message to and from the upstream.
    Proxy(Arc<Upstream>),
}

impl ServiceMode {
    /// Proxy mode for the upstream in `settings`.
    pub fn proxy(settings: &RelaySettings, config: &ServerConfig) -> Result<Self> {
        let upstream = Upstream::new(&settings.upstream, config.websocket_config())?;
        Ok(Self::Proxy(Arc::new(upstream)))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Proxy(_) => "proxy",
        }
    }
}

/// State shared by the accept loop and every connection task.
struct ServerContext {
    config: ServerConfig,
    mode: ServiceMode,
    tls: Option<TlsAcceptor>,
}

/// WebSocket echo/relay server.
///
/// ```ignore
/// let server = RelayServer::new(config, ServiceMode::Echo, None);
/// let (addr, accept_loop) = server.listen().await?;
/// // ...
/// server.graceful_shutdown().await;
/// accept_loop.await?;
/// ```
pub struct RelayServer {
    context: Arc<ServerContext>,
    sessions: Arc<SessionTracker>,
}

impl RelayServer {
    /// Create a server. `tls` wraps every accepted connection when set.
    pub fn new(config: ServerConfig, mode: ServiceMode, tls: Option<TlsAcceptor>) -> Self {
        Self {
            context: Arc::new(ServerContext { config, mode, tls }),
            sessions: Arc::new(SessionTracker::new()),
        }
    }

    /// Build from loaded settings: TLS from `settings.tls`, proxy mode when
    /// `proxy` is set.
    pub fn from_settings(settings: &RelaySettings, proxy: bool) -> Result<Self> {
        let config = ServerConfig::from_settings(settings);
        let tls = TlsServerOptions::from_settings(&settings.tls)
            .map(|options| TlsAcceptor::new(&options))
            .transpose()?;
        let mode = if proxy {
            ServiceMode::proxy(settings, &config)?
        } else {
            ServiceMode::Echo
        };
        Ok(Self::new(config, mode, tls))
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Whether connections are wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        self.context.tls.is_some()
    }

    /// Bind and start accepting.
    ///
    /// Returns the bound address (useful with port `0`) and the accept loop
    /// handle, which finishes once shutdown starts.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let bind_addr = self.context.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: bind_addr,
            source,
        })?;

        info!(
            %addr,
            mode = self.context.mode.name(),
            tls = self.context.tls.is_some(),
            mutual_tls = self.context.tls.as_ref().is_some_and(TlsAcceptor::is_mutual),
            "listening"
        );

        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.context),
            Arc::clone(&self.sessions),
        ));
        Ok((addr, handle))
    }

    /// Stop accepting and cancel every session. Returns immediately.
    pub fn shutdown(&self) {
        self.sessions.stop();
    }

    /// Cancel everything and wait for sessions to close, up to the
    /// configured shutdown timeout. Returns `false` on timeout.
    pub async fn graceful_shutdown(&self) -> bool {
        self.sessions.drain(self.context.config.shutdown_timeout).await
    }

    /// Connections currently being served.
    pub fn active_sessions(&self) -> usize {
        self.sessions.live_sessions()
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    sessions: Arc<SessionTracker>,
) {
    let cancel = sessions.stop_signal();
    let limit = (context.config.max_connections > 0)
        .then(|| Arc::new(Semaphore::new(context.config.max_connections)));

    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                continue;
            }
        };

        let permit = match &limit {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(%peer, max = context.config.max_connections, "connection limit reached, rejecting");
                    drop(stream);
                    continue;
                }
            },
            None => None,
        };

        let _ = stream.set_nodelay(true);
        let id = ConnectionId::new();
        let span = info_span!("conn", conn_id = %id, %peer);
        let context = Arc::clone(&context);
        let cancel = cancel.clone();
        let _ = sessions.spawn_session(
            async move {
                let _permit = permit;
                serve_connection(context, stream, id, peer, cancel).await;
            }
            .instrument(span),
        );
    }

    info!("accept loop stopped");
}

async fn serve_connection(
    context: Arc<ServerContext>,
    stream: TcpStream,
    id: ConnectionId,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    debug!("connection accepted");
    let state = ConnectionState::new(id, peer.to_string());
    let deadline = Instant::now() + context.config.handshake_timeout;

    let result = match &context.tls {
        Some(acceptor) => match timeout_at(deadline, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => run_session(&context, tls_stream, &state, deadline, cancel).await,
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RelayError::Handshake("TLS handshake timed out".into())),
        },
        None => run_session(&context, stream, &state, deadline, cancel).await,
    };

    if let Err(err) = result {
        state.phase.mark_closed();
        match &err {
            RelayError::TlsVerification(_) => {
                warn!(error_kind = err.kind(), error = %err, "client rejected during TLS handshake");
            }
            RelayError::Handshake(_) => {
                debug!(error_kind = err.kind(), error = %err, "handshake failed");
            }
            _ => warn!(error_kind = err.kind(), error = %err, "session failed"),
        }
    }
}

/// WebSocket handshake, then echo or relay until the session ends.
async fn run_session<S>(
    context: &ServerContext,
    stream: S,
    state: &Arc<ConnectionState>,
    deadline: Instant,
    cancel: CancellationToken,
) -> Result<SessionSummary>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws, info) = timeout_at(deadline, accept_websocket(stream, context.config.websocket_config()))
        .await
        .map_err(|_| RelayError::Handshake("WebSocket handshake timed out".into()))??;
    debug!(
        path = %info.path,
        origin = info.origin.as_deref().unwrap_or("-"),
        has_cookie = info.has_cookie,
        "websocket handshake complete"
    );

    let mut inbound = Endpoint::open(ws, Arc::clone(state))?;
    let options = SessionOptions {
        idle_timeout: context.config.idle_timeout,
    };

    let upstream = match &context.mode {
        ServiceMode::Echo => return Ok(run_echo(inbound, options, cancel).await),
        ServiceMode::Proxy(upstream) => upstream,
    };

    let connected = tokio::select! {
        () = cancel.cancelled() => None,
        connected = upstream.connect(&info.path) => Some(connected),
    };
    let (stream, url) = match connected {
        Some(Ok(pair)) => pair,
        Some(Err(err)) => {
            close_inbound(&mut inbound, CloseCode::Error, "upstream unavailable").await;
            return Err(err);
        }
        None => {
            close_inbound(&mut inbound, CloseCode::Away, "going away").await;
            return Ok(SessionSummary {
                reason: EndReason::Shutdown,
                inbound_messages: 0,
                outbound_messages: 0,
                error: None,
            });
        }
    };
    info!(upstream = %url, "upstream connected");

    let outbound_state = ConnectionState::new(state.id, url);
    let outbound = Endpoint::open(stream, outbound_state)?;
    Ok(run_relay(inbound, outbound, options, cancel).await)
}

/// Close an inbound connection that never got a session.
async fn close_inbound<S>(
    inbound: &mut Endpoint<tokio_tungstenite::WebSocketStream<S>>,
    code: CloseCode,
    reason: &'static str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !inbound.state.phase.begin_close() {
        return;
    }
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = inbound.transport.close(Some(frame)).await {
        debug!(error = %e, "inbound close failed");
    }
    inbound.state.phase.mark_closed();
}
