//! Auth Context Manager: the operation catalogue over any [`Transport`].
//!
//! One manager is built per signed-in session and handed to whatever needs
//! it. It owns the transport, resolves per-operation timeouts, and caches
//! the descriptor of the current auth context so decrypt calls can reuse it.

pub mod normalize;
pub mod operation;
pub mod signature;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::bridge::Transport;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, CodecError};

pub use operation::{Operation, TimeoutPolicy};
use signature::normalize_signature;
pub use types::*;

pub struct AuthContextManager {
    transport: Arc<dyn Transport>,
    timeouts: TimeoutPolicy,
    content_gateway: Option<String>,
    auth_context: RwLock<Option<AuthContext>>,
}

impl AuthContextManager {
    pub fn new(transport: Arc<dyn Transport>, timeouts: TimeoutPolicy) -> Self {
        Self {
            transport,
            timeouts,
            content_gateway: None,
            auth_context: RwLock::new(None),
        }
    }

    /// Manager with the timeouts and content gateway from `config`.
    pub fn from_config(transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        tracing::info!(
            backend = transport.name(),
            network = %config.network,
            "Auth context manager created"
        );
        Self::new(transport, config.timeouts()).with_content_gateway(config.content_gateway_url.clone())
    }

    /// Gateway used for content locators that do not name their own.
    pub fn with_content_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.content_gateway = Some(gateway.into());
        self
    }

    pub fn backend(&self) -> &'static str {
        self.transport.name()
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    pub fn pending_requests(&self) -> usize {
        self.transport.pending_requests()
    }

    pub async fn wait_for_ready(&self) -> Result<(), BridgeError> {
        self.transport.wait_for_ready(self.timeouts.ready).await
    }

    /// Dispatch `operation` by wire name and decode the result as `T`.
    ///
    /// `timeout` overrides the operation's budget from the timeout policy.
    pub async fn send_request<T: DeserializeOwned>(
        &self,
        operation: &str,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<T, BridgeError> {
        let operation: Operation = operation.parse()?;
        let value = self.dispatch(operation, payload, timeout).await?;
        decode_result(operation, value)
    }

    async fn dispatch(
        &self,
        operation: Operation,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.for_operation(operation));
        let result = self
            .transport
            .send_request(operation, payload, timeout)
            .await;
        if let Err(e) = &result {
            tracing::debug!(
                backend = self.backend(),
                operation = %operation,
                code = e.code(),
                error = %e,
                "Bridge operation failed"
            );
        }
        result
    }

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        operation: Operation,
        params: &P,
    ) -> Result<T, BridgeError> {
        let payload = to_payload(operation, params)?;
        let value = self.dispatch(operation, Some(payload), None).await?;
        decode_result(operation, value)
    }

    pub async fn healthcheck(&self) -> Result<HealthcheckResult, BridgeError> {
        let value = self.dispatch(Operation::Healthcheck, None, None).await?;
        decode_result(Operation::Healthcheck, value)
    }

    /// Connect to the network and report the node handshake.
    pub async fn test_connect(&self) -> Result<ConnectResult, BridgeError> {
        let value = self.dispatch(Operation::TestConnect, None, None).await?;
        decode_result(Operation::TestConnect, value)
    }

    /// Wallet-signature auth method for an EOA key.
    ///
    /// `nonce` is normally the network's latest blockhash.
    pub async fn create_eth_wallet_auth_data(
        &self,
        private_key: &SecretString,
        nonce: &str,
    ) -> Result<AuthMethod, BridgeError> {
        let params = EthWalletAuthParams {
            private_key_hex: private_key.expose_secret().to_string(),
            nonce: nonce.to_string(),
        };
        self.call(Operation::CreateEthWalletAuthData, &params).await
    }

    pub async fn mint_and_register_pkp(
        &self,
        params: &MintPkpParams,
    ) -> Result<MintPkpResult, BridgeError> {
        self.call(Operation::MintAndRegisterPkp, params).await
    }

    pub async fn authenticate_passkey(
        &self,
        params: &AuthenticatePasskeyParams,
    ) -> Result<AuthMethod, BridgeError> {
        self.call(Operation::AuthenticatePasskey, params).await
    }

    pub async fn view_pkps_by_auth_data(
        &self,
        params: &ViewPkpsParams,
    ) -> Result<KeyPairPage, BridgeError> {
        self.call(Operation::ViewPkpsByAuthData, params).await
    }

    /// Create a session auth context and cache its descriptor.
    ///
    /// An empty access token or policy domain is rejected before the
    /// transport is touched.
    pub async fn create_auth_context(
        &self,
        params: &CreateAuthContextParams,
    ) -> Result<AuthContext, BridgeError> {
        if params.access_token.trim().is_empty() {
            return Err(BridgeError::Precondition(
                "createAuthContext requires a non-empty accessToken".to_string(),
            ));
        }
        if params.auth_config.domain.trim().is_empty() {
            return Err(BridgeError::Precondition(
                "authConfig.domain cannot be empty".to_string(),
            ));
        }

        let context: AuthContext = self.call(Operation::CreateAuthContext, params).await?;
        *self.auth_context.write().await = Some(context.clone());
        Ok(context)
    }

    pub async fn current_auth_context(&self) -> Option<AuthContext> {
        self.auth_context.read().await.clone()
    }

    pub async fn execute_js(&self, params: &ExecuteJsParams) -> Result<ExecuteJsResult, BridgeError> {
        self.call(Operation::ExecuteJs, params).await
    }

    /// Sign `message` with the PKP. Combined signature values coming back
    /// from the network are flattened to a 65-byte hex string.
    pub async fn sign_message(
        &self,
        params: &SignMessageParams,
    ) -> Result<SignMessageResult, BridgeError> {
        let operation = Operation::SignMessage;
        let payload = to_payload(operation, params)?;
        let value = self.dispatch(operation, Some(payload), None).await?;

        let combined = match value {
            Value::Object(mut map) if map.contains_key("signature") => {
                map.remove("signature").unwrap_or(Value::Null)
            }
            other => other,
        };
        let signature = match combined {
            Value::String(flat) => flat,
            other => normalize_signature(&other).map_err(|e| {
                CodecError::UnexpectedShape(format!("{operation} result: {e}"))
            })?,
        };
        Ok(SignMessageResult { signature })
    }

    pub async fn encrypt(&self, params: &EncryptParams) -> Result<EncryptResult, BridgeError> {
        self.call(Operation::Encrypt, params).await
    }

    pub async fn decrypt(&self, params: &DecryptParams) -> Result<DecryptResult, BridgeError> {
        self.call(Operation::Decrypt, params).await
    }

    /// Decrypt under the cached auth context.
    pub async fn decrypt_with_current_context(
        &self,
        ciphertext: impl Into<String>,
        data_to_encrypt_hash: impl Into<String>,
        conditions: AccessControlConditions,
    ) -> Result<DecryptResult, BridgeError> {
        let auth_context = self.current_auth_context().await.ok_or_else(|| {
            BridgeError::Precondition("decrypt requires an auth context".to_string())
        })?;
        self.decrypt(&DecryptParams {
            ciphertext: ciphertext.into(),
            data_to_encrypt_hash: data_to_encrypt_hash.into(),
            conditions,
            auth_context,
        })
        .await
    }

    pub async fn fetch_and_decrypt_content(
        &self,
        locator: ContentLocator,
        conditions: AccessControlConditions,
    ) -> Result<FetchAndDecryptResult, BridgeError> {
        let source_url = locator
            .source_url(self.content_gateway.as_deref())
            .map_err(BridgeError::Precondition)?;
        tracing::debug!(source_url = %source_url, "Resolved content locator");
        self.call(
            Operation::FetchAndDecryptContent,
            &FetchAndDecryptParams {
                locator,
                conditions,
                source_url,
            },
        )
        .await
    }

    /// Drop the cached context locally, then ask the backend to forget it.
    pub async fn clear_auth_context(&self) -> Result<ClearAuthContextResult, BridgeError> {
        self.auth_context.write().await.take();
        let value = self
            .dispatch(Operation::ClearAuthContext, None, None)
            .await?;
        decode_result(Operation::ClearAuthContext, value)
    }

    /// Tear down the transport. Every pending call fails with "bridge destroyed".
    pub async fn destroy(&self) {
        self.auth_context.write().await.take();
        self.transport.destroy().await;
    }
}

fn to_payload<P: Serialize>(operation: Operation, params: &P) -> Result<Value, BridgeError> {
    serde_json::to_value(params).map_err(|e| {
        BridgeError::Codec(CodecError::Serialize {
            what: operation.as_str(),
            reason: e.to_string(),
        })
    })
}

fn decode_result<T: DeserializeOwned>(operation: Operation, value: Value) -> Result<T, BridgeError> {
    serde_json::from_value(value).map_err(|e| {
        BridgeError::Codec(CodecError::UnexpectedShape(format!(
            "{operation} result: {e}"
        )))
    })
}
