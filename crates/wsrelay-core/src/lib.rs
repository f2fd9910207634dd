//! # wsrelay-core
//!
//! Foundation types shared by the wsrelay crates:
//!
//! - **Errors**: [`RelayError`] covering connect, transport, TLS and startup failures
//! - **IDs**: [`ConnectionId`] newtype used to correlate log lines per connection
//! - **Constants**: default ports and upstream URL
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{RelayError, Result};
pub use ids::ConnectionId;
