//! Native transport: each operation maps onto one asynchronous binding.
//!
//! There is no wire envelope on the way in. Payloads are unpacked into plain
//! arguments and each binding answers with a textual `{ok, result?, error?}`
//! envelope. The network session secret produced by `createAuthContext`
//! stays inside this module; callers only see the [`AuthContext`] descriptor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::auth::normalize::{prepare_payload, strip_hex_prefix};
use crate::auth::operation::Operation;
use crate::auth::types::{
    AccessControlConditions, AuthContext, AuthenticatePasskeyParams, CreateAuthContextParams,
    DecryptParams, EncryptParams, EthWalletAuthParams, ExecuteJsParams, FetchAndDecryptParams,
    MintPkpParams, SignMessageParams, ViewPkpsParams,
};
use crate::bridge::codec::{decode, encode, normalize_numbers};
use crate::bridge::readiness::ReadinessGate;
use crate::bridge::transport::{BridgeCore, Transport};
use crate::error::{BridgeError, CodecError};

const BACKEND: &str = "native";
const MODULE_UNAVAILABLE: &str = "native module unavailable";
const SESSION_HANDLE_FIELD: &str = "sessionHandle";

/// Network the native SDK talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTarget {
    pub network: String,
    pub rpc_url: String,
}

/// Outcome of a native call: an envelope string, or the message of an
/// exception raised by the native layer.
pub type NativeReply = Result<String, String>;

/// Entry points exposed by the native SDK module.
///
/// Condition sets, script parameters and policy documents are passed as JSON
/// text; everything else is a plain string, number or flag.
#[async_trait]
pub trait NativeBindings: Send + Sync {
    async fn healthcheck(&self, target: &NativeTarget) -> NativeReply;

    /// Connect to the network and report the handshake.
    async fn test_connect(&self, target: &NativeTarget) -> NativeReply;

    async fn create_eth_wallet_auth_data(&self, private_key_hex: &str, nonce: &str) -> NativeReply;

    async fn mint_and_register_pkp(
        &self,
        target: &NativeTarget,
        auth_service_url: &str,
        rp_id: &str,
        scopes: &[String],
        display_name: &str,
    ) -> NativeReply;

    async fn authenticate_passkey(&self, target: &NativeTarget, rp_id: &str) -> NativeReply;

    async fn view_pkps_by_auth_data(
        &self,
        target: &NativeTarget,
        auth_method_type: u32,
        auth_method_id: &str,
        limit: u64,
        offset: u64,
    ) -> NativeReply;

    async fn create_auth_context(
        &self,
        target: &NativeTarget,
        pkp_public_key: &str,
        auth_method_type: u32,
        auth_method_id: &str,
        access_token: &str,
        auth_config_json: &str,
    ) -> NativeReply;

    async fn execute_js(
        &self,
        target: &NativeTarget,
        session_handle: &str,
        code: Option<&str>,
        ipfs_id: Option<&str>,
        js_params_json: &str,
        use_single_node: bool,
    ) -> NativeReply;

    async fn sign_message(
        &self,
        target: &NativeTarget,
        session_handle: &str,
        message: &str,
        public_key: &str,
    ) -> NativeReply;

    async fn encrypt(
        &self,
        target: &NativeTarget,
        plaintext: &str,
        conditions_json: &str,
    ) -> NativeReply;

    async fn decrypt(
        &self,
        target: &NativeTarget,
        session_handle: &str,
        ciphertext: &str,
        data_to_encrypt_hash: &str,
        conditions_json: &str,
    ) -> NativeReply;

    async fn fetch_and_decrypt_content(
        &self,
        target: &NativeTarget,
        session_handle: &str,
        source_url: &str,
        conditions_json: &str,
    ) -> NativeReply;

    async fn clear_auth_context(&self, session_handle: Option<&str>) -> NativeReply;
}

#[derive(Deserialize)]
struct NativeEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Opaque handle to the session key held by the native layer.
struct SessionKeyHandle(SecretString);

impl fmt::Debug for SessionKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeyHandle([REDACTED])")
    }
}

#[derive(Debug)]
struct NativeSession {
    handle: SessionKeyHandle,
    descriptor: AuthContext,
}

pub struct NativeTransport {
    core: BridgeCore,
    bindings: Option<Arc<dyn NativeBindings>>,
    target: NativeTarget,
    session: Mutex<Option<NativeSession>>,
}

impl NativeTransport {
    /// `bindings` is `None` when the native module failed to load; every call
    /// then fails with the same "module unavailable" error.
    pub fn new(
        bindings: Option<Arc<dyn NativeBindings>>,
        target: NativeTarget,
        ready_timeout: Duration,
    ) -> Self {
        // Native bindings have no boot handshake.
        let readiness = if bindings.is_some() {
            ReadinessGate::ready()
        } else {
            ReadinessGate::new()
        };
        Self {
            core: BridgeCore::new(readiness, ready_timeout),
            bindings,
            target,
            session: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &NativeTarget {
        &self.target
    }

    /// Descriptor of the cached session, if one exists.
    pub async fn session_descriptor(&self) -> Option<AuthContext> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.descriptor.clone())
    }

    fn bindings(&self) -> Result<&Arc<dyn NativeBindings>, BridgeError> {
        self.bindings
            .as_ref()
            .ok_or_else(|| BridgeError::TransportUnavailable(MODULE_UNAVAILABLE.to_string()))
    }

    async fn dispatch(
        &self,
        operation: Operation,
        payload: Option<Value>,
    ) -> Result<Value, BridgeError> {
        let bindings = self.bindings()?;
        let target = &self.target;

        match operation {
            Operation::Healthcheck => unwrap_reply(operation, bindings.healthcheck(target).await),
            Operation::TestConnect => unwrap_reply(operation, bindings.test_connect(target).await),
            Operation::CreateEthWalletAuthData => {
                let params: EthWalletAuthParams = params(operation, payload)?;
                let reply = bindings
                    .create_eth_wallet_auth_data(&params.private_key_hex, &params.nonce)
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::MintAndRegisterPkp => {
                let params: MintPkpParams = params(operation, payload)?;
                let reply = bindings
                    .mint_and_register_pkp(
                        target,
                        &params.auth_service_url,
                        &params.rp_id,
                        &params.scopes,
                        &params.display_name,
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::AuthenticatePasskey => {
                let params: AuthenticatePasskeyParams = params(operation, payload)?;
                unwrap_reply(
                    operation,
                    bindings.authenticate_passkey(target, &params.rp_id).await,
                )
            }
            Operation::ViewPkpsByAuthData => {
                let params: ViewPkpsParams = params(operation, payload)?;
                let reply = bindings
                    .view_pkps_by_auth_data(
                        target,
                        params.auth_method_type,
                        &params.auth_method_id,
                        params.limit.unwrap_or_default(),
                        params.offset.unwrap_or_default(),
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::CreateAuthContext => self.create_session(bindings, payload).await,
            Operation::ExecuteJs => {
                let params: ExecuteJsParams = params(operation, payload)?;
                let js_params = json_text(
                    operation,
                    &params.js_params.unwrap_or_else(|| Value::Object(Default::default())),
                )?;
                let session = self.session.lock().await;
                let session = require_session(operation, session.as_ref())?;
                let reply = bindings
                    .execute_js(
                        target,
                        session.handle.0.expose_secret(),
                        params.code.as_deref(),
                        params.ipfs_id.as_deref(),
                        &js_params,
                        params.use_single_node,
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::SignMessage => {
                let params: SignMessageParams = params(operation, payload)?;
                let session = self.session.lock().await;
                let session = require_session(operation, session.as_ref())?;
                let requested = params.public_key.trim();
                let public_key = if requested.is_empty() {
                    session.descriptor.pkp_public_key.as_str()
                } else if same_hex(&session.descriptor.pkp_public_key, requested) {
                    requested
                } else {
                    return Err(BridgeError::Precondition(
                        "publicKey does not match the PKP of the current auth context".to_string(),
                    ));
                };
                let reply = bindings
                    .sign_message(
                        target,
                        session.handle.0.expose_secret(),
                        &params.message,
                        public_key,
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::Encrypt => {
                let params: EncryptParams = params(operation, payload)?;
                let conditions = conditions_text(operation, &params.conditions)?;
                unwrap_reply(
                    operation,
                    bindings.encrypt(target, &params.plaintext, &conditions).await,
                )
            }
            Operation::Decrypt => {
                let params: DecryptParams = params(operation, payload)?;
                let conditions = conditions_text(operation, &params.conditions)?;
                let session = self.session.lock().await;
                let session = require_session(operation, session.as_ref())?;
                if !same_hex(
                    &session.descriptor.session_public_key,
                    &params.auth_context.session_public_key,
                ) {
                    return Err(BridgeError::Precondition(
                        "authContext does not belong to the current session".to_string(),
                    ));
                }
                let reply = bindings
                    .decrypt(
                        target,
                        session.handle.0.expose_secret(),
                        &params.ciphertext,
                        &params.data_to_encrypt_hash,
                        &conditions,
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::FetchAndDecryptContent => {
                let params: FetchAndDecryptParams = params(operation, payload)?;
                let conditions = conditions_text(operation, &params.conditions)?;
                let session = self.session.lock().await;
                let session = require_session(operation, session.as_ref())?;
                let reply = bindings
                    .fetch_and_decrypt_content(
                        target,
                        session.handle.0.expose_secret(),
                        &params.source_url,
                        &conditions,
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
            Operation::ClearAuthContext => {
                let mut session = self.session.lock().await;
                let previous = session.take();
                let reply = bindings
                    .clear_auth_context(
                        previous
                            .as_ref()
                            .map(|session| session.handle.0.expose_secret()),
                    )
                    .await;
                unwrap_reply(operation, reply)
            }
        }
    }

    /// Create a session and keep its secret handle on this side of the boundary.
    async fn create_session(
        &self,
        bindings: &Arc<dyn NativeBindings>,
        payload: Option<Value>,
    ) -> Result<Value, BridgeError> {
        let operation = Operation::CreateAuthContext;
        let params: CreateAuthContextParams = params(operation, payload)?;
        let auth_config = json_text(operation, &params.auth_config)?;

        let mut session = self.session.lock().await;
        let reply = bindings
            .create_auth_context(
                &self.target,
                &params.pkp_public_key,
                params.auth_method_type,
                &params.auth_method_id,
                &params.access_token,
                &auth_config,
            )
            .await;
        let mut result = unwrap_reply(operation, reply)?;

        let handle = match result.as_object_mut().map(|map| map.remove(SESSION_HANDLE_FIELD)) {
            Some(Some(Value::String(handle))) if !handle.is_empty() => handle,
            _ => {
                return Err(BridgeError::remote(
                    operation.as_str(),
                    "native layer returned no session handle",
                ));
            }
        };
        let descriptor: AuthContext = serde_json::from_value(result.clone()).map_err(|e| {
            CodecError::UnexpectedShape(format!("{operation} result: {e}"))
        })?;

        tracing::info!(
            backend = BACKEND,
            pkp = %descriptor.pkp_public_key,
            session = %descriptor.session_public_key,
            "Native auth context created"
        );
        *session = Some(NativeSession {
            handle: SessionKeyHandle(SecretString::from(handle)),
            descriptor,
        });
        Ok(result)
    }
}

fn params<T: DeserializeOwned>(operation: Operation, payload: Option<Value>) -> Result<T, BridgeError> {
    serde_json::from_value(payload.unwrap_or(Value::Null)).map_err(|e| {
        BridgeError::Precondition(format!("invalid {operation} payload: {e}"))
    })
}

fn json_text<T: serde::Serialize>(operation: Operation, value: &T) -> Result<String, BridgeError> {
    encode(value).map_err(|e| {
        tracing::error!(backend = BACKEND, operation = %operation, error = %e, "Failed to encode native argument");
        BridgeError::Codec(e)
    })
}

fn conditions_text(
    operation: Operation,
    conditions: &AccessControlConditions,
) -> Result<String, BridgeError> {
    if conditions.is_empty() {
        return Err(BridgeError::Precondition(format!(
            "{operation} requires at least one access control condition"
        )));
    }
    json_text(operation, conditions)
}

/// Hex strings compared without prefix or case.
fn same_hex(a: &str, b: &str) -> bool {
    strip_hex_prefix(a).eq_ignore_ascii_case(strip_hex_prefix(b))
}

fn require_session(
    operation: Operation,
    session: Option<&NativeSession>,
) -> Result<&NativeSession, BridgeError> {
    session.ok_or_else(|| {
        BridgeError::Precondition(format!(
            "{operation} requires an auth context; call createAuthContext first"
        ))
    })
}

/// Decode a native reply into the caller-facing result.
fn unwrap_reply(operation: Operation, reply: NativeReply) -> Result<Value, BridgeError> {
    let text = reply.map_err(|message| BridgeError::remote(operation.as_str(), message))?;
    let envelope: NativeEnvelope = decode(&text)?;
    if envelope.ok {
        Ok(normalize_numbers(envelope.result.unwrap_or(Value::Null)))
    } else {
        Err(BridgeError::remote(
            operation.as_str(),
            envelope.error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

#[async_trait]
impl Transport for NativeTransport {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn wait_for_ready(&self, timeout: Duration) -> Result<(), BridgeError> {
        self.core.ensure_live()?;
        self.bindings()?;
        self.core.wait_for_ready("waitForReady", timeout).await
    }

    async fn send_request(
        &self,
        operation: Operation,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.core.ensure_live()?;
        self.bindings()?;

        let payload = prepare_payload(operation, payload)?;
        self.core.gate(operation).await?;

        let handle = self.core.register(operation, timeout)?;
        let id = handle.id().to_string();
        tracing::debug!(backend = BACKEND, id = %id, operation = %operation, "Calling native binding");

        let call = async {
            let outcome = self.dispatch(operation, payload).await;
            self.core.correlator().settle(&id, outcome);
        };
        let wait = handle.wait();
        tokio::pin!(wait);

        // Timeout and destroy settle the handle; the binding future is then dropped.
        tokio::select! {
            biased;
            outcome = &mut wait => outcome,
            _ = call => wait.await,
        }
    }

    async fn destroy(&self) {
        self.core.shutdown();
        let previous = self.session.lock().await.take();
        // The native layer caches the session secret too; teardown must drop it there.
        if let (Some(session), Ok(bindings)) = (previous, self.bindings()) {
            let reply = bindings
                .clear_auth_context(Some(session.handle.0.expose_secret()))
                .await;
            if let Err(e) = unwrap_reply(Operation::ClearAuthContext, reply) {
                tracing::warn!(backend = BACKEND, error = %e, "Failed to clear native session on destroy");
            }
        }
    }

    fn pending_requests(&self) -> usize {
        self.core.correlator().pending_count()
    }
}
