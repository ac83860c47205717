/// Error types for HostMesh operations.
///
/// This module provides the error hierarchy for the replicated host
/// inventory. All fallible operations return `Result<T, HostMeshError>`.
use thiserror::Error;

/// The main error type for HostMesh operations.
///
/// Per the design, nothing arising from applying a local or peer host
/// update/remove is fatal: transport, decode, and handler failures are
/// logged and swallowed at the call site (see `gossip`). This type exists
/// for the operations that *can* meaningfully fail: transport setup,
/// codec round-trips, and lifecycle misuse.
#[derive(Error, Debug)]
pub enum HostMeshError {
    /// Encoding a wire message failed.
    #[error("failed to encode message: {0}")]
    EncodeError(#[from] serde_json::Error),

    /// Decoding an inbound wire message failed.
    #[error("failed to decode message: {reason}")]
    DecodeError {
        /// Why decoding failed.
        reason: String,
    },

    /// A transport-level send or bind failed.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A peer address or node id could not be resolved.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The engine was asked to do something that requires it to be running.
    #[error("engine is not active")]
    NotActive,

    /// The engine was already started.
    #[error("engine is already active")]
    AlreadyActive,
}

/// Result type alias for HostMesh operations.
pub type HostMeshResult<T> = Result<T, HostMeshError>;
