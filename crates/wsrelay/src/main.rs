//! # wsrelay
//!
//! Command-line entry point: run the echo server or the relay proxy, or send
//! one message to a WebSocket endpoint and print the reply.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_tungstenite::tungstenite::Message;
use wsrelay_core::constants::VERSION;
use wsrelay_core::logging::{LogFormat, init_subscriber};
use wsrelay_server::RelayServer;
use wsrelay_server::client::send_message;
use wsrelay_server::tls::{TlsClientOptions, TlsConnector};
use wsrelay_settings::{RelaySettings, load_layers, validate};

/// WebSocket echo server and relay proxy.
#[derive(Parser, Debug)]
#[command(name = "wsrelay", version, about = "WebSocket echo server and relay proxy")]
struct Cli {
    /// JSON settings file, merged over the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send every message back to its sender.
    Echo(ServeArgs),
    /// Relay every connection to an upstream WebSocket endpoint.
    Proxy(ProxyArgs),
    /// Send one text message and print the first reply.
    Send(SendArgs),
}

/// Listener flags shared by `echo` and `proxy`.
#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign). Defaults to 8000, 8001 with TLS
    /// and 8002 with mutual TLS.
    #[arg(long)]
    port: Option<u16>,

    /// Server certificate chain (PEM). Enables TLS.
    #[arg(long)]
    server_cert: Option<PathBuf>,

    /// Server private key (PEM). Read from the certificate file when omitted.
    #[arg(long)]
    server_key: Option<PathBuf>,

    /// CA bundle for client certificates (PEM). Enables mutual TLS.
    #[arg(long)]
    client_ca: Option<PathBuf>,

    /// Close sessions idle for this many milliseconds (0 disables).
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Maximum concurrent connections (0 = unlimited).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level or filter directive when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Log JSON lines instead of compact text.
    #[arg(long)]
    log_json: bool,
}

#[derive(Args, Debug)]
struct ProxyArgs {
    #[command(flatten)]
    serve: ServeArgs,

    /// Upstream base URL (`ws://` or `wss://`).
    #[arg(long)]
    upstream_url: Option<String>,

    /// CA bundle trusted for a `wss://` upstream (PEM).
    #[arg(long)]
    upstream_ca: Option<PathBuf>,

    /// Client certificate presented to the upstream (PEM).
    #[arg(long, requires = "upstream_key")]
    upstream_cert: Option<PathBuf>,

    /// Private key for `--upstream-cert` (PEM).
    #[arg(long, requires = "upstream_cert")]
    upstream_key: Option<PathBuf>,

    /// Dial the upstream base URL for every connection, ignoring the
    /// request path.
    #[arg(long)]
    no_forward_path: bool,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Endpoint to connect to, e.g. `wss://localhost:8002/`.
    url: String,

    /// Text message to send.
    message: String,

    /// CA bundle trusted for `wss://` (PEM).
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Client certificate for mutual TLS (PEM).
    #[arg(long, requires = "client_key")]
    client_cert: Option<PathBuf>,

    /// Private key for `--client-cert` (PEM).
    #[arg(long, requires = "client_cert")]
    client_key: Option<PathBuf>,

    /// Give up when no reply arrives within this many milliseconds.
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,
}

impl ServeArgs {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = Some(port);
        }
        if let Some(path) = &self.server_cert {
            settings.tls.cert_path = Some(path.clone());
        }
        if let Some(path) = &self.server_key {
            settings.tls.key_path = Some(path.clone());
        }
        if let Some(path) = &self.client_ca {
            settings.tls.client_ca_path = Some(path.clone());
        }
        if let Some(ms) = self.idle_timeout_ms {
            settings.server.idle_timeout_ms = ms;
        }
        if let Some(n) = self.max_connections {
            settings.server.max_connections = n;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

impl ProxyArgs {
    fn apply(&self, settings: &mut RelaySettings) {
        self.serve.apply(settings);
        if let Some(url) = &self.upstream_url {
            settings.upstream.url.clone_from(url);
        }
        if let Some(path) = &self.upstream_ca {
            settings.upstream.ca_path = Some(path.clone());
        }
        if let Some(path) = &self.upstream_cert {
            settings.upstream.client_cert_path = Some(path.clone());
        }
        if let Some(path) = &self.upstream_key {
            settings.upstream.client_key_path = Some(path.clone());
        }
        if self.no_forward_path {
            settings.upstream.forward_path = false;
        }
    }
}

impl SendArgs {
    fn tls_options(&self) -> TlsClientOptions {
        TlsClientOptions {
            ca_path: self.ca.clone(),
            client_cert_path: self.client_cert.clone(),
            client_key_path: self.client_key.clone(),
        }
    }
}

/// Defaults, then the settings file and environment, then CLI flags.
/// Validation runs once, on the combined result.
fn resolve_settings(
    config: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
    apply_flags: impl FnOnce(&mut RelaySettings),
) -> Result<RelaySettings> {
    let mut settings = load_layers(config, env).with_context(|| match config {
        Some(path) => format!("Failed to load settings from {}", path.display()),
        None => "Failed to load settings".to_string(),
    })?;
    apply_flags(&mut settings);
    validate(&settings).context("Invalid settings")?;
    Ok(settings)
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

async fn serve(settings: RelaySettings, proxy: bool) -> Result<()> {
    init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    let server =
        RelayServer::from_settings(&settings, proxy).context("Failed to configure server")?;
    let (addr, accept_loop) = server.listen().await.context("Failed to bind server")?;

    let scheme = if server.is_tls() { "wss" } else { "ws" };
    if proxy {
        tracing::info!(
            upstream = %settings.upstream.url,
            "wsrelay {VERSION} relaying on {scheme}://{addr}"
        );
    } else {
        tracing::info!("wsrelay {VERSION} echoing on {scheme}://{addr}");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.graceful_shutdown().await {
        tracing::warn!(
            remaining = server.active_sessions(),
            "sessions still open after shutdown timeout"
        );
    }
    let _ = accept_loop.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn send(args: SendArgs) -> Result<()> {
    init_subscriber("warn", LogFormat::Compact);

    let tls = TlsConnector::new(&args.tls_options()).context("Failed to load TLS files")?;
    let reply = send_message(
        &args.url,
        &args.message,
        &tls,
        Duration::from_millis(args.timeout_ms),
    )
    .await
    .with_context(|| format!("No reply from {}", args.url))?;

    match reply {
        Message::Text(text) => println!("{}", text.as_str()),
        Message::Binary(data) => println!("{}", String::from_utf8_lossy(&data)),
        other => println!("{other}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Command::Echo(args) => {
            let settings = resolve_settings(config, &process_env, |s| args.apply(s))?;
            serve(settings, false).await
        }
        Command::Proxy(args) => {
            let settings = resolve_settings(config, &process_env, |s| args.apply(s))?;
            serve(settings, true).await
        }
        Command::Send(args) => send(args).await,
    }
}
