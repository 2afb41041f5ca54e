//! Request correlation for in-flight bridge calls.
//!
//! Every outbound request is registered here under a unique id before it is
//! dispatched. Exactly one of resolve, reject, timeout or `cancel_all`
//! settles it; whichever comes first removes the table entry, and later
//! arrivals for the same id are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BridgeError;

type Completion = oneshot::Sender<Result<Value, BridgeError>>;

struct PendingRequest {
    operation: String,
    completion: Completion,
    registered_at: Instant,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingRequest>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
    // Entries are only inserted/removed under the lock, so a poisoned guard
    // still holds a consistent map.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared table of outstanding requests.
pub struct RequestCorrelator {
    pending: PendingTable,
    counter: AtomicU64,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
        }
    }

    /// Next request id: `req_<unix millis>_<counter>`.
    ///
    /// The timestamp keeps ids from colliding with ones handed out by a
    /// previous bridge instance talking to the same engine.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req_{}_{}", Utc::now().timestamp_millis(), n)
    }

    /// Track a new request. The returned handle owns the wait and its timer.
    pub fn register(
        &self,
        id: impl Into<String>,
        operation: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingHandle, BridgeError> {
        let id = id.into();
        let operation = operation.into();
        let (tx, rx) = oneshot::channel();

        {
            let mut table = lock(&self.pending);
            if table.contains_key(&id) {
                return Err(BridgeError::Precondition(format!(
                    "request id {id} is already pending"
                )));
            }
            table.insert(
                id.clone(),
                PendingRequest {
                    operation: operation.clone(),
                    completion: tx,
                    registered_at: Instant::now(),
                },
            );
        }

        tracing::trace!(id = %id, operation = %operation, ?timeout, "Registered pending request");

        Ok(PendingHandle {
            id,
            operation,
            timeout,
            receiver: rx,
            table: Arc::clone(&self.pending),
        })
    }

    /// Settle a pending request successfully. Returns `false` for unknown ids.
    pub fn resolve(&self, id: &str, result: Value) -> bool {
        self.settle(id, Ok(result))
    }

    /// Settle a pending request with a failure. Returns `false` for unknown ids.
    pub fn reject(&self, id: &str, error: BridgeError) -> bool {
        self.settle(id, Err(error))
    }

    /// Settle with whatever outcome the transport produced.
    pub fn settle(&self, id: &str, outcome: Result<Value, BridgeError>) -> bool {
        self.settle_with(id, |_| outcome)
    }

    /// Settle with an outcome built from the registered operation name.
    pub fn settle_with<F>(&self, id: &str, build: F) -> bool
    where
        F: FnOnce(&str) -> Result<Value, BridgeError>,
    {
        let entry = lock(&self.pending).remove(id);
        match entry {
            Some(entry) => {
                let outcome = build(&entry.operation);
                tracing::trace!(
                    id = %id,
                    operation = %entry.operation,
                    elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Settled pending request"
                );
                // The waiter may have been dropped already; nothing to do then.
                let _ = entry.completion.send(outcome);
                true
            }
            None => {
                tracing::debug!(id = %id, "Dropping response for unknown or expired request id");
                false
            }
        }
    }

    /// Reject everything outstanding with `reason` and clear the table.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = lock(&self.pending).drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.completion.send(Err(BridgeError::Cancelled {
                operation: entry.operation,
                reason: reason.to_string(),
            }));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }
}

/// Caller side of a registered request.
///
/// Dropping the handle without waiting removes the table entry, so an
/// abandoned caller never leaks a pending slot.
pub struct PendingHandle {
    id: String,
    operation: String,
    timeout: Duration,
    receiver: oneshot::Receiver<Result<Value, BridgeError>>,
    table: PendingTable,
}

impl PendingHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the outcome or the per-request timeout, whichever comes first.
    pub async fn wait(mut self) -> Result<Value, BridgeError> {
        match tokio::time::timeout(self.timeout, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::Cancelled {
                operation: self.operation.clone(),
                reason: "completion channel closed".to_string(),
            }),
            Err(_) => {
                let removed = lock(&self.table).remove(&self.id).is_some();
                if !removed {
                    // Settled between the timer firing and taking the lock.
                    if let Ok(outcome) = self.receiver.try_recv() {
                        return outcome;
                    }
                }
                tracing::warn!(
                    id = %self.id,
                    operation = %self.operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Bridge request timed out"
                );
                Err(BridgeError::Timeout {
                    operation: self.operation.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.id);
    }
}
