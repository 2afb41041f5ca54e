//! Operation catalogue and per-operation timeout policy.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::BridgeError;

/// Every operation the bridge can dispatch, on either backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Healthcheck,
    TestConnect,
    CreateEthWalletAuthData,
    MintAndRegisterPkp,
    AuthenticatePasskey,
    ViewPkpsByAuthData,
    CreateAuthContext,
    ExecuteJs,
    SignMessage,
    Encrypt,
    Decrypt,
    FetchAndDecryptContent,
    ClearAuthContext,
}

/// Which budget an operation draws its timeout from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Liveness probe: short, and never waits for readiness.
    Immediate,
    Default,
    /// Work that fans out across the threshold network.
    Extended,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::Healthcheck,
        Operation::TestConnect,
        Operation::CreateEthWalletAuthData,
        Operation::MintAndRegisterPkp,
        Operation::AuthenticatePasskey,
        Operation::ViewPkpsByAuthData,
        Operation::CreateAuthContext,
        Operation::ExecuteJs,
        Operation::SignMessage,
        Operation::Encrypt,
        Operation::Decrypt,
        Operation::FetchAndDecryptContent,
        Operation::ClearAuthContext,
    ];

    /// Wire name used in `BridgeRequest.operation`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthcheck => "healthcheck",
            Self::TestConnect => "testConnect",
            Self::CreateEthWalletAuthData => "createEthWalletAuthData",
            Self::MintAndRegisterPkp => "mintAndRegisterPkp",
            Self::AuthenticatePasskey => "authenticatePasskey",
            Self::ViewPkpsByAuthData => "viewPkpsByAuthData",
            Self::CreateAuthContext => "createAuthContext",
            Self::ExecuteJs => "executeJs",
            Self::SignMessage => "signMessage",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::FetchAndDecryptContent => "fetchAndDecryptContent",
            Self::ClearAuthContext => "clearAuthContext",
        }
    }

    pub fn timeout_class(self) -> TimeoutClass {
        match self {
            Self::Healthcheck => TimeoutClass::Immediate,
            Self::ExecuteJs | Self::Encrypt | Self::Decrypt | Self::FetchAndDecryptContent => {
                TimeoutClass::Extended
            }
            _ => TimeoutClass::Default,
        }
    }

    pub fn bypasses_readiness(self) -> bool {
        matches!(self, Self::Healthcheck)
    }

    /// Signing and minting are never safe to replay.
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Self::Healthcheck
                | Self::TestConnect
                | Self::ViewPkpsByAuthData
                | Self::ClearAuthContext
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| BridgeError::UnknownOperation(name.to_string()))
    }
}

/// Timeout budgets resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub extended: Duration,
    pub ready: Duration,
    pub liveness: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(30_000),
            extended: Duration::from_millis(120_000),
            ready: Duration::from_millis(30_000),
            liveness: Duration::from_millis(5_000),
        }
    }
}

impl TimeoutPolicy {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation.timeout_class() {
            TimeoutClass::Immediate => self.liveness,
            TimeoutClass::Default => self.default,
            TimeoutClass::Extended => self.extended,
        }
    }
}
