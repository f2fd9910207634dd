//! Errors from resolving settings.

use thiserror::Error;

/// Why settings could not be resolved.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON, or does not fit the schema.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),

    /// A value, or a combination of values, is not allowed.
    #[error("invalid setting {field}: {reason}")]
    InvalidValue {
        /// Dotted camelCase path of the offending setting, e.g. `tls.keyPath`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Settings result.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn invalid_value_names_the_field() {
        let err = SettingsError::invalid("upstream.url", "must start with ws:// or wss://");
        assert_eq!(
            err.to_string(),
            "invalid setting upstream.url: must start with ws:// or wss://"
        );
        assert_matches!(err, SettingsError::InvalidValue { field: "upstream.url", .. });
    }

    #[test]
    fn io_and_json_convert() {
        let io: SettingsError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(io.to_string().starts_with("cannot read settings file"));

        let json: SettingsError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_matches!(json, SettingsError::Json(_));
    }
}
