//! Error types for the custody bridge.

use std::time::Duration;

use regex::Regex;

/// Caller-facing failure for every bridge operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Bridge not ready after {timeout:?} (operation: {operation})")]
    NotReady {
        operation: String,
        timeout: Duration,
    },

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("{operation} rejected: {message}")]
    Remote { operation: String, message: String },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{operation} cancelled: {reason}")]
    Cancelled { operation: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BridgeError {
    /// Whether a caller may reasonably retry an idempotent operation after this failure.
    ///
    /// The bridge never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NotReady { .. } | Self::TransportUnavailable(_)
        )
    }

    /// Remote rejection carrying the far side's message verbatim.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Stable short code for logs and operator surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::NotReady { .. } => "not_ready",
            Self::TransportUnavailable(_) => "transport_unavailable",
            Self::Remote { .. } => "remote_rejection",
            Self::Precondition(_) => "precondition",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::Cancelled { .. } => "cancelled",
            Self::Codec(_) => "codec",
            Self::Storage(_) => "storage",
        }
    }
}

/// Envelope encode/decode failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unexpected message shape: {0}")]
    UnexpectedShape(String),

    #[error("Failed to serialize {what}: {reason}")]
    Serialize { what: &'static str, reason: String },
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Secure storage failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed for {key}: {reason}")]
    Io { key: String, reason: String },

    #[error("Storage crypto failed: {0}")]
    Crypto(String),

    #[error("Storage data corrupt: {0}")]
    Corrupt(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mask bearer tokens, access tokens and similar values before an error
/// string reaches a log line.
pub fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    let patterns = [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(access[_\-]?token|accessToken|token|secret|password|session[_\-]?handle)\b(\s*[:=]\s*)([^,\s]+)",
            "$1$2[REDACTED]",
        ),
    ];

    for (pattern, replacement) in patterns {
        if let Ok(re) = Regex::new(pattern) {
            value = re.replace_all(&value, replacement).to_string();
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_operation() {
        let err = BridgeError::Timeout {
            operation: "executeJs".to_string(),
            timeout: Duration::from_secs(120),
        };
        assert!(err.to_string().contains("executeJs"));
        assert!(err.is_retryable());
        assert_eq!(err.code(), "timeout");
    }

    #[test]
    fn remote_rejection_is_verbatim_and_final() {
        let err = BridgeError::remote("signMessage", "pkpSign failed: node quorum lost");
        match &err {
            BridgeError::Remote { message, .. } => {
                assert_eq!(message, "pkpSign failed: node quorum lost")
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn redaction_masks_tokens() {
        let redacted = redact_sensitive_detail("auth failed accessToken=abc123, Bearer eyJhbGci.x");
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("eyJhbGci"));
        assert!(redacted.contains("[REDACTED]"));
    }
}
