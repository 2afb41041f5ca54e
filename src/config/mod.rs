//! Configuration for the custody bridge.
//!
//! Everything comes from env vars. `bootstrap::load_env()` runs dotenvy for
//! `./.env` and `~/.custody-bridge/.env` first; real env vars always win.

pub(crate) mod helpers;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::auth::operation::TimeoutPolicy;
use crate::bridge::NativeTarget;
use crate::error::ConfigError;

use self::helpers::{duration_ms_env, normalize_variant, optional_env, validate_url};

pub const DEFAULT_RPC_URL: &str = "https://yellowstone-rpc.litprotocol.com";
pub const DEFAULT_CONTENT_GATEWAY_URL: &str = "https://gateway.s3-node-1.load.network";

/// Which transport backs the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sandbox,
    Native,
}

impl BackendKind {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "sandbox" | "webview" => Ok(Self::Sandbox),
            "native" => Ok(Self::Native),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'sandbox' or 'native', got '{value}'"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Native => "native",
        }
    }
}

/// Threshold network the bridge connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LitNetwork {
    NagaDev,
    NagaTest,
    NagaStaging,
    NagaProto,
    Naga,
}

impl LitNetwork {
    pub const ALL: [LitNetwork; 5] = [
        LitNetwork::NagaDev,
        LitNetwork::NagaTest,
        LitNetwork::NagaStaging,
        LitNetwork::NagaProto,
        LitNetwork::Naga,
    ];

    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        let normalized = normalize_variant(value);
        Self::ALL
            .into_iter()
            .find(|network| network.as_str() == normalized)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!(
                    "expected one of {}, got '{value}'",
                    Self::ALL.map(Self::as_str).join(", ")
                ),
            })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NagaDev => "naga-dev",
            Self::NagaTest => "naga-test",
            Self::NagaStaging => "naga-staging",
            Self::NagaProto => "naga-proto",
            Self::Naga => "naga",
        }
    }
}

impl fmt::Display for LitNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved bridge configuration.
pub struct BridgeConfig {
    pub backend: BackendKind,
    pub network: LitNetwork,
    pub rpc_url: String,
    pub default_timeout: Duration,
    pub extended_timeout: Duration,
    pub ready_timeout: Duration,
    pub liveness_timeout: Duration,
    pub auth_service_url: Option<String>,
    pub passkey_rp_id: Option<String>,
    pub content_gateway_url: String,
    pub secure_storage_path: PathBuf,
    /// Master secret for the encrypted storage file. Without it only
    /// in-memory storage is available.
    pub secure_storage_key: Option<SecretString>,
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("backend", &self.backend)
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url)
            .field("default_timeout", &self.default_timeout)
            .field("extended_timeout", &self.extended_timeout)
            .field("ready_timeout", &self.ready_timeout)
            .field("liveness_timeout", &self.liveness_timeout)
            .field("auth_service_url", &self.auth_service_url)
            .field("passkey_rp_id", &self.passkey_rp_id)
            .field("content_gateway_url", &self.content_gateway_url)
            .field("secure_storage_path", &self.secure_storage_path)
            .field(
                "secure_storage_key",
                &self.secure_storage_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl BridgeConfig {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        let backend = BackendKind::parse(
            &optional_env("CUSTODY_BRIDGE_BACKEND")?.unwrap_or_else(|| "sandbox".to_string()),
            "CUSTODY_BRIDGE_BACKEND",
        )?;
        let network = LitNetwork::parse(
            &optional_env("LIT_NETWORK")?.unwrap_or_else(|| "naga-dev".to_string()),
            "LIT_NETWORK",
        )?;
        let rpc_url = validate_url(
            "LIT_RPC_URL",
            &optional_env("LIT_RPC_URL")?.unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
        )?;

        let default_timeout = duration_ms_env("BRIDGE_DEFAULT_TIMEOUT_MS", 30_000)?;
        let extended_timeout = duration_ms_env("BRIDGE_EXTENDED_TIMEOUT_MS", 120_000)?;
        if extended_timeout < default_timeout {
            return Err(ConfigError::InvalidValue {
                key: "BRIDGE_EXTENDED_TIMEOUT_MS".to_string(),
                message: format!(
                    "must be >= BRIDGE_DEFAULT_TIMEOUT_MS ({} ms)",
                    default_timeout.as_millis()
                ),
            });
        }
        let ready_timeout = duration_ms_env("BRIDGE_READY_TIMEOUT_MS", 30_000)?;
        let liveness_timeout = duration_ms_env("BRIDGE_LIVENESS_TIMEOUT_MS", 5_000)?;

        let auth_service_url = optional_env("AUTH_SERVICE_URL")?
            .map(|url| validate_url("AUTH_SERVICE_URL", &url))
            .transpose()?;
        let passkey_rp_id = optional_env("PASSKEY_RP_ID")?;
        let content_gateway_url = validate_url(
            "CONTENT_GATEWAY_URL",
            &optional_env("CONTENT_GATEWAY_URL")?
                .unwrap_or_else(|| DEFAULT_CONTENT_GATEWAY_URL.to_string()),
        )?;

        let secure_storage_path = optional_env("SECURE_STORAGE_PATH")?
            .map(PathBuf::from)
            .unwrap_or_else(default_secure_storage_path);
        let secure_storage_key = optional_env("SECURE_STORAGE_KEY")?.map(SecretString::from);

        Ok(Self {
            backend,
            network,
            rpc_url,
            default_timeout,
            extended_timeout,
            ready_timeout,
            liveness_timeout,
            auth_service_url,
            passkey_rp_id,
            content_gateway_url,
            secure_storage_path,
            secure_storage_key,
        })
    }

    pub fn timeouts(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            default: self.default_timeout,
            extended: self.extended_timeout,
            ready: self.ready_timeout,
            liveness: self.liveness_timeout,
        }
    }

    pub fn native_target(&self) -> NativeTarget {
        NativeTarget {
            network: self.network.as_str().to_string(),
            rpc_url: self.rpc_url.clone(),
        }
    }
}

/// `~/.custody-bridge`, or `./.custody-bridge` when there is no home dir.
pub fn custody_bridge_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".custody-bridge")
}

fn default_secure_storage_path() -> PathBuf {
    custody_bridge_dir().join("secure-store.json")
}
