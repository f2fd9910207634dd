//! # wsrelay-settings
//!
//! Layered configuration for wsrelay.
//!
//! Settings are resolved in priority order (later wins):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: JSON passed with `--config`, deep-merged over defaults
//! 3. **Environment variables**: `WSRELAY_*` overrides
//! 4. **CLI flags**: applied by the binary
//!
//! [`validate`] runs once, after the last layer.
//!
//! There is no global settings instance; the loaded value is handed to the
//! server explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, load_layers, load_settings, merge_json, validate};
pub use types::{LoggingSettings, RelaySettings, ServerSettings, TlsSettings, UpstreamSettings};
