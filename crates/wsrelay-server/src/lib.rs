//! # wsrelay-server
//!
//! WebSocket echo and relay server.
//!
//! - **Server**: [`RelayServer`] binds a TCP listener, optionally wraps each
//!   connection in TLS (with client-certificate verification for mutual TLS)
//!   and runs one session task per connection
//! - **Sessions**: [`session::run_echo`] and [`session::run_relay`] with
//!   paired shutdown and an optional idle timeout
//! - **Upstream**: [`upstream::Upstream`] resolves and dials the proxied endpoint
//! - **Client**: [`client::send_message`] for one request/reply exchange
//! - **Shutdown**: [`SessionTracker`] stops sessions, waits for them and
//!   aborts stragglers

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod handshake;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod tls;
pub mod upstream;

pub use config::ServerConfig;
pub use server::{RelayServer, ServiceMode};
pub use shutdown::SessionTracker;
