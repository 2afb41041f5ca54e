//! Env-var helpers shared by the config resolvers.

use std::time::Duration;

use crate::error::ConfigError;

/// Read an env var, treating unset and blank values alike.
///
/// A value that is not valid unicode is a configuration error rather than
/// being silently ignored.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

/// Millisecond budget from `key`, falling back to `default_ms`. Zero is rejected.
pub(crate) fn duration_ms_env(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = optional_env(key)?
        .map(|s| s.parse::<u64>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a positive integer: {e}"),
        })?
        .unwrap_or(default_ms);
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

/// Parse `value` as an absolute http(s) URL.
pub(crate) fn validate_url(key: &str, value: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid URL '{value}': {e}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an http(s) URL, got '{value}'"),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

pub(crate) fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['_', ' '], "-")
}
