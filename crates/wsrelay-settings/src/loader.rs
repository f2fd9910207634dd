//! Resolving [`RelaySettings`] from defaults, a JSON file and the environment.
//!
//! The file is merged into the serialized defaults as JSON, so a file only
//! needs the keys it changes. Environment overrides are read through a
//! lookup function, which keeps them testable without touching the process
//! environment. CLI flags are the binary's job and are applied on top.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Resolve settings: defaults, then `path` (if any), then `WSRELAY_*` from
/// the process environment.
///
/// A file that was asked for but does not exist is an error. The result is
/// not validated yet: the binary layers its flags on top and then calls
/// [`validate`] once.
pub fn load_settings(path: Option<&Path>) -> Result<RelaySettings> {
    load_layers(path, &|name| std::env::var(name).ok())
}

/// [`load_settings`] with the environment read through `lookup`.
pub fn load_layers(
    path: Option<&Path>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    let mut tree = serde_json::to_value(RelaySettings::default())?;
    if let Some(path) = path {
        debug!(path = %path.display(), "reading settings file");
        let raw = std::fs::read_to_string(path)?;
        merge_json(&mut tree, serde_json::from_str(&raw)?);
    }

    let mut settings: RelaySettings = serde_json::from_value(tree)?;
    apply_overrides(&mut settings, lookup);
    Ok(settings)
}

/// Merge `overlay` into `base` in place.
///
/// Objects merge key by key; any other overlay value replaces what is in
/// `base`. `null` in the overlay leaves the base value alone.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `WSRELAY_*` overrides read through `lookup`.
///
/// A value that does not parse is logged and skipped; the previous value
/// stays. Empty strings count as unset.
pub fn apply_overrides(settings: &mut RelaySettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = Env { lookup };
    let server = &mut settings.server;
    env.text("WSRELAY_HOST", &mut server.host);
    env.parsed("WSRELAY_PORT", "port", &mut server.port, |v| {
        parse_in_range(v, &(0..=u16::MAX)).map(Some)
    });
    env.number("WSRELAY_MAX_CONNECTIONS", 0..=1_000_000, &mut server.max_connections);
    env.number("WSRELAY_IDLE_TIMEOUT_MS", 0..=86_400_000, &mut server.idle_timeout_ms);

    env.text("WSRELAY_UPSTREAM_URL", &mut settings.upstream.url);

    let tls = &mut settings.tls;
    env.path("WSRELAY_TLS_CERT", &mut tls.cert_path);
    env.path("WSRELAY_TLS_KEY", &mut tls.key_path);
    env.path("WSRELAY_TLS_CLIENT_CA", &mut tls.client_ca_path);

    env.text("WSRELAY_LOG_LEVEL", &mut settings.logging.level);
    env.flag("WSRELAY_LOG_JSON", &mut settings.logging.json);
}

/// Reject combinations that cannot work.
///
/// File paths are not opened here; unreadable certificates surface when the
/// server builds its TLS config.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    let tls = &settings.tls;
    if tls.cert_path.is_none() {
        if tls.key_path.is_some() {
            return Err(SettingsError::invalid("tls.keyPath", "set without tls.certPath"));
        }
        if tls.client_ca_path.is_some() {
            return Err(SettingsError::invalid(
                "tls.clientCaPath",
                "mutual TLS needs tls.certPath",
            ));
        }
    }

    let upstream = &settings.upstream;
    if !["ws://", "wss://"].iter().any(|scheme| upstream.url.starts_with(scheme)) {
        return Err(SettingsError::invalid(
            "upstream.url",
            format!("must start with ws:// or wss://, got {:?}", upstream.url),
        ));
    }
    if upstream.client_cert_path.is_some() != upstream.client_key_path.is_some() {
        return Err(SettingsError::invalid(
            "upstream.clientCertPath",
            "upstream.clientCertPath and upstream.clientKeyPath go together",
        ));
    }

    if settings.server.max_message_size == 0 {
        return Err(SettingsError::invalid("server.maxMessageSize", "must be non-zero"));
    }
    Ok(())
}

/// Parse an on/off value: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`,
/// any case.
pub fn parse_flag(val: &str) -> Option<bool> {
    const ON: [&str; 4] = ["true", "1", "yes", "on"];
    const OFF: [&str; 4] = ["false", "0", "no", "off"];

    let val = val.trim();
    if ON.iter().any(|v| val.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if OFF.iter().any(|v| val.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

/// Parse a number and accept it only inside `range`.
pub fn parse_in_range<T>(val: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

/// Typed readers over an environment lookup. Each one writes into its slot
/// only when the variable is set and valid.
struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn text(&self, name: &str, slot: &mut String) {
        if let Some(val) = self.raw(name) {
            *slot = val;
        }
    }

    fn path(&self, name: &str, slot: &mut Option<PathBuf>) {
        if let Some(val) = self.raw(name) {
            *slot = Some(PathBuf::from(val));
        }
    }

    fn flag(&self, name: &str, slot: &mut bool) {
        self.parsed(name, "on/off", slot, parse_flag);
    }

    fn number<T>(&self, name: &str, range: RangeInclusive<T>, slot: &mut T)
    where
        T: FromStr + PartialOrd,
    {
        self.parsed(name, "number in range", slot, |v| parse_in_range(v, &range));
    }

    fn parsed<T>(&self, name: &str, expected: &str, slot: &mut T, parse: impl Fn(&str) -> Option<T>) {
        let Some(val) = self.raw(name) else {
            return;
        };
        match parse(&val) {
            Some(parsed) => *slot = parsed,
            None => warn!(key = name, value = %val, expected, "ignoring invalid env var"),
        }
    }
}
