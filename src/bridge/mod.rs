//! Transport layer between the host and the threshold network.
//!
//! ```text
//!   AuthContextManager
//!          │ send_request(operation, payload, timeout)
//!          ▼
//!   dyn Transport ──┬── SandboxTransport ── ScriptHost (post_message / handle_message)
//!                   │         └── StorageProxy ── SecureStorage
//!                   └── NativeTransport ── NativeBindings
//!
//!   both: BridgeCore = RequestCorrelator + ReadinessGate + destroy flag
//! ```

pub mod codec;
pub mod correlator;
pub mod native;
pub mod readiness;
pub mod sandbox;
pub mod storage;
pub mod transport;

pub use native::{NativeBindings, NativeReply, NativeTarget, NativeTransport};
pub use sandbox::{SandboxTransport, ScriptHost};
pub use transport::{BRIDGE_DESTROYED, Transport};
