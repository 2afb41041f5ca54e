//! One-shot readiness signal for the remote engine.
//!
//! `NotReady -> Ready` is terminal. A bridge that needs to boot again is
//! replaced by a new instance instead of resetting this gate.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::BridgeError;

pub struct ReadinessGate {
    state: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Gate that starts out open, for backends with no boot phase.
    pub fn ready() -> Self {
        let (state, _) = watch::channel(true);
        Self { state }
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow()
    }

    /// Flip to ready. Returns `true` only on the first transition.
    pub fn mark_ready(&self) -> bool {
        let transitioned = self.state.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if transitioned {
            tracing::info!("Bridge engine signalled ready");
        }
        transitioned
    }

    /// Suspend until ready or until `timeout` elapses.
    ///
    /// `operation` names the call that is waiting, for the timeout error.
    pub async fn await_ready(&self, operation: &str, timeout: Duration) -> Result<(), BridgeError> {
        let mut rx = self.state.subscribe();
        let opened = async move { rx.wait_for(|ready| *ready).await.map(drop) };
        match tokio::time::timeout(timeout, opened).await {
            Ok(Ok(())) => Ok(()),
            // The sender lives in `self`, so it cannot be closed while we borrow it.
            Ok(Err(_)) => Err(BridgeError::TransportUnavailable(
                "readiness signal closed".to_string(),
            )),
            Err(_) => Err(BridgeError::NotReady {
                operation: operation.to_string(),
                timeout,
            }),
        }
    }
}
