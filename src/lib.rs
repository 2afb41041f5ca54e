//! Threshold-custody bridge.
//!
//! Lets an application run authenticated operations against a distributed
//! threshold-cryptography network through one of two interchangeable
//! backends: a sandboxed script engine reached by message passing, or a
//! native SDK reached by direct async calls. Callers talk to an
//! [`AuthContextManager`] and never branch on which backend is active.
//!
//! One bridge instance serves one signed-in session. Build it explicitly and
//! pass it to whatever needs it; tear it down with `destroy()`.

pub mod auth;
pub mod bootstrap;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod secure_store;

pub use auth::{AuthContextManager, Operation, TimeoutPolicy};
pub use bridge::{
    BRIDGE_DESTROYED, NativeBindings, NativeTarget, NativeTransport, SandboxTransport, ScriptHost,
    Transport,
};
pub use config::{BackendKind, BridgeConfig, LitNetwork};
pub use error::{BridgeError, CodecError, ConfigError, StorageError};
pub use secure_store::{EncryptedFileStorage, MemorySecureStorage, SecureStorage};
