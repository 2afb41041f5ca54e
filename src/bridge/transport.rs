//! Backend transport contract.
//!
//! Both backends implement [`Transport`]; calling code holds an
//! `Arc<dyn Transport>` and never branches on which one it has. The shared
//! lifecycle (correlation table, readiness gate, destroy flag) lives in
//! [`BridgeCore`] so the two implementations settle, time out and cancel
//! requests identically.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::auth::operation::Operation;
use crate::bridge::correlator::{PendingHandle, RequestCorrelator};
use crate::bridge::readiness::ReadinessGate;
use crate::error::BridgeError;

/// Reason attached to every request cancelled by `destroy()`.
pub const BRIDGE_DESTROYED: &str = "bridge destroyed";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &'static str;

    /// Suspend until the backend can serve requests.
    async fn wait_for_ready(&self, timeout: Duration) -> Result<(), BridgeError>;

    /// Dispatch one catalogue operation and wait for its outcome.
    async fn send_request(
        &self,
        operation: Operation,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError>;

    /// Cancel every outstanding request and refuse new ones.
    async fn destroy(&self);

    fn pending_requests(&self) -> usize;
}

/// Lifecycle state shared by both transports.
pub struct BridgeCore {
    correlator: RequestCorrelator,
    readiness: ReadinessGate,
    destroyed: watch::Sender<bool>,
    ready_timeout: Duration,
}

impl BridgeCore {
    pub fn new(readiness: ReadinessGate, ready_timeout: Duration) -> Self {
        let (destroyed, _) = watch::channel(false);
        Self {
            correlator: RequestCorrelator::new(),
            readiness,
            destroyed,
            ready_timeout,
        }
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn readiness(&self) -> &ReadinessGate {
        &self.readiness
    }

    pub fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }

    /// Receiver that flips to `true` once `shutdown` runs.
    pub fn destroyed_signal(&self) -> watch::Receiver<bool> {
        self.destroyed.subscribe()
    }

    /// Resolves once `shutdown` has run.
    pub async fn until_destroyed(&self) {
        let mut destroyed = self.destroyed_signal();
        // The borrow guard from `wait_for` is not `Send`; drop it here.
        let _ = destroyed.wait_for(|gone| *gone).await.map(drop);
    }

    pub fn ensure_live(&self) -> Result<(), BridgeError> {
        if self.is_destroyed() {
            return Err(BridgeError::TransportUnavailable(BRIDGE_DESTROYED.to_string()));
        }
        Ok(())
    }

    fn destroyed_error(operation: &str) -> BridgeError {
        BridgeError::Cancelled {
            operation: operation.to_string(),
            reason: BRIDGE_DESTROYED.to_string(),
        }
    }

    /// Wait for readiness, bounded by `timeout`, unless the bridge is torn
    /// down first.
    pub async fn wait_for_ready(&self, operation: &str, timeout: Duration) -> Result<(), BridgeError> {
        tokio::select! {
            result = self.readiness.await_ready(operation, timeout) => result,
            _ = self.until_destroyed() => Err(Self::destroyed_error(operation)),
        }
    }

    /// Readiness gate applied before dispatching `operation`.
    pub async fn gate(&self, operation: Operation) -> Result<(), BridgeError> {
        if operation.bypasses_readiness() {
            return Ok(());
        }
        self.wait_for_ready(operation.as_str(), self.ready_timeout)
            .await
    }

    /// Register a new request under a fresh id.
    pub fn register(&self, operation: Operation, timeout: Duration) -> Result<PendingHandle, BridgeError> {
        let id = self.correlator.next_id();
        let handle = self.correlator.register(id, operation.as_str(), timeout)?;
        // `destroy` sets the flag before draining the table, so an entry that
        // slipped in after the drain is caught here.
        if self.is_destroyed() {
            self.correlator
                .reject(handle.id(), Self::destroyed_error(operation.as_str()));
        }
        Ok(handle)
    }

    /// Mark destroyed and cancel everything outstanding.
    pub fn shutdown(&self) -> usize {
        self.destroyed.send_replace(true);
        let cancelled = self.correlator.cancel_all(BRIDGE_DESTROYED);
        tracing::info!(cancelled, "Bridge destroyed");
        cancelled
    }
}
