//! Error types for the operation log and checkpoint-client layer.

use thiserror::Error;

/// Result type for checkpoint-layer operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while encoding, storing or transmitting operations.
///
/// This is deliberately narrower than the coordination core's own error taxonomy
/// (see `durable_runtime::error::DurableError`): this crate only knows about the
/// wire/storage layer, not retry decisions or replay semantics.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No operation exists for the given id.
    #[error("operation not found: {0}")]
    NotFound(String),

    /// A user payload or error record failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary encoding error, used for size-estimation helpers.
    #[error("binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// The checkpoint client's transport failed; the caller is expected to
    /// retry per its own retry policy.
    #[error("checkpoint transport error: {0}")]
    Transport(String),

    /// The backend rejected a checkpoint call because the supplied token was
    /// stale (another batch committed first).
    #[error("stale checkpoint token")]
    StaleToken,

    /// A record on the wire named a `kind` or `status` enum value this crate
    /// doesn't recognize. Treated as fatal for the affected operation only.
    #[error("unknown operation {field}: {value}")]
    UnknownEnumValue { field: &'static str, value: String },

    /// I/O error, surfaced by test-double backends that persist to disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for test doubles and adapters.
    #[error("{0}")]
    Custom(String),
}
