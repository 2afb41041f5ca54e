//! Message-passing transport over a sandboxed script engine.
//!
//! Requests are posted into the sandbox as [`BridgeRequest`] text; replies,
//! readiness, engine errors and storage calls come back through
//! [`SandboxTransport::handle_message`] (or the [`SandboxTransport::run_inbound`]
//! pump). Inbound handling never fails: a malformed message is logged and
//! dropped so that unrelated in-flight requests are unaffected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::normalize::prepare_payload;
use crate::auth::operation::Operation;
use crate::bridge::codec::{
    BridgeRequest, InboundMessage, OutboundMessage, StorageResponse, decode_inbound,
    encode_outbound,
};
use crate::bridge::readiness::ReadinessGate;
use crate::bridge::storage::StorageProxy;
use crate::bridge::transport::{BridgeCore, Transport};
use crate::error::{BridgeError, redact_sensitive_detail};
use crate::secure_store::SecureStorage;

const BACKEND: &str = "sandbox";

/// Host side of the sandbox: something that can deliver text into the engine.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn post_message(&self, text: String) -> Result<(), BridgeError>;

    /// Whether the sandbox has been mounted at all.
    fn is_available(&self) -> bool {
        true
    }
}

pub struct SandboxTransport {
    core: BridgeCore,
    host: Arc<dyn ScriptHost>,
    storage: StorageProxy,
}

impl SandboxTransport {
    pub fn new(
        host: Arc<dyn ScriptHost>,
        storage: Arc<dyn SecureStorage>,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            core: BridgeCore::new(ReadinessGate::new(), ready_timeout),
            host,
            storage: StorageProxy::new(storage),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.core.readiness().is_ready()
    }

    /// Process one inbound message from the sandbox.
    pub async fn handle_message(&self, text: &str) {
        let message = match decode_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                // Dropped on purpose: one bad message must not fail other callers.
                tracing::warn!(backend = BACKEND, error = %e, "Dropping malformed inbound message");
                return;
            }
        };

        match message {
            InboundMessage::Ready => {
                self.core.readiness().mark_ready();
            }
            InboundMessage::EngineError(error) => {
                tracing::error!(
                    backend = BACKEND,
                    error = %redact_sensitive_detail(&error),
                    "Sandbox engine reported an error"
                );
            }
            InboundMessage::Storage(request) => {
                let reply = self.storage.handle(request).await;
                self.post_storage_reply(reply).await;
            }
            InboundMessage::Response(response) => {
                let id = response.id.clone();
                self.core
                    .correlator()
                    .settle_with(&id, |operation| response.into_result(operation));
            }
        }
    }

    async fn post_storage_reply(&self, reply: StorageResponse) {
        let id = reply.id.clone();
        let text = match encode_outbound(&OutboundMessage::Storage(reply)) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(backend = BACKEND, id = %id, error = %e, "Failed to encode storage reply");
                return;
            }
        };
        if let Err(e) = self.host.post_message(text).await {
            tracing::warn!(backend = BACKEND, id = %id, error = %e, "Failed to post storage reply");
        }
    }

    /// Drain `inbound` into [`Self::handle_message`] until the channel closes
    /// or the bridge is destroyed.
    pub async fn run_inbound(&self, mut inbound: mpsc::Receiver<String>) {
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(text) => self.handle_message(&text).await,
                    None => break,
                },
                _ = self.core.until_destroyed() => break,
            }
        }
        tracing::debug!(backend = BACKEND, "Inbound pump stopped");
    }
}

#[async_trait]
impl Transport for SandboxTransport {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn wait_for_ready(&self, timeout: Duration) -> Result<(), BridgeError> {
        self.core.ensure_live()?;
        self.core.wait_for_ready("waitForReady", timeout).await
    }

    async fn send_request(
        &self,
        operation: Operation,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.core.ensure_live()?;
        if !self.host.is_available() {
            return Err(BridgeError::TransportUnavailable(
                "script host not initialised".to_string(),
            ));
        }

        let payload = prepare_payload(operation, payload)?;
        self.core.gate(operation).await?;

        let handle = self.core.register(operation, timeout)?;
        let text = encode_outbound(&OutboundMessage::Request(BridgeRequest {
            id: handle.id().to_string(),
            operation: operation.as_str().to_string(),
            payload,
        }))?;

        let id = handle.id().to_string();
        tracing::debug!(backend = BACKEND, id = %id, operation = %operation, "Posting bridge request");

        let post = async {
            if let Err(e) = self.host.post_message(text).await {
                self.core.correlator().settle(&id, Err(e));
            }
        };
        let wait = handle.wait();
        tokio::pin!(wait);

        // A host that never finishes posting is still bounded by the
        // request timeout and by destroy.
        tokio::select! {
            biased;
            outcome = &mut wait => outcome,
            _ = post => wait.await,
        }
    }

    async fn destroy(&self) {
        self.core.shutdown();
    }

    fn pending_requests(&self) -> usize {
        self.core.correlator().pending_count()
    }
}
