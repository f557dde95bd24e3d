//! Error types for the coordination core.
//!
//! # Error categories
//!
//! - **Per-operation, recoverable**: `StepFailedError`, `StepInterruptedError`, the terminal
//!   external-state errors (`InvokeFailed`, `InvokeTimedOut`, `CallbackFailed`, ...). These are
//!   returned by a single operation's `get()` and do not affect the rest of the execution.
//! - **Fatal, execution-terminating**: `NonDeterministic`, `Serde`, `IllegalOperation`. These
//!   abort the whole execution as FAILED; see [`DurableError::is_fatal`].
//! - **Backend transport**: wraps [`durable_checkpoint::CheckpointError`]; treated as a
//!   generic error subject to the caller's retry policy, not operation-specific.
//!
//! The suspension signal used to unwind a handler activity when no work remains locally is
//! deliberately *not* a variant here — see `crate::activity::Suspend`.

use durable_checkpoint::ErrorRecord;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DurableError>;

#[derive(Error, Debug)]
pub enum DurableError {
    /// A Step exhausted its retry policy; `get()` surfaces the user error it last recorded.
    #[error("step '{operation_id}' failed: {error}")]
    StepFailed {
        operation_id: String,
        error: ErrorRecord,
    },

    /// Replay observed a STARTED (non-terminal) `AT_MOST_ONCE_PER_RETRY` step.
    #[error("step '{operation_id}' was interrupted mid-attempt and cannot be safely resumed")]
    StepInterrupted { operation_id: String },

    /// A chained invocation reached a terminal non-success status.
    #[error("invoke '{operation_id}' did not succeed: {status:?}")]
    InvokeNotSucceeded {
        operation_id: String,
        status: durable_checkpoint::OperationStatus,
        error: Option<ErrorRecord>,
    },

    /// A callback reached a terminal non-success status.
    #[error("callback '{operation_id}' did not succeed: {status:?}")]
    CallbackNotSucceeded {
        operation_id: String,
        status: durable_checkpoint::OperationStatus,
        error: Option<ErrorRecord>,
    },

    /// A child context's user function threw.
    #[error("child context '{operation_id}' failed: {error}")]
    ChildContextFailed {
        operation_id: String,
        error: ErrorRecord,
    },

    /// Id appeared twice with a mismatched `(kind, name, parentId)` tuple. Fatal.
    #[error("non-deterministic replay at operation '{operation_id}': {detail}")]
    NonDeterministic { operation_id: String, detail: String },

    /// Encoding or decoding a user payload or error record failed. Fatal at the point of use.
    #[error("serialization error: {0}")]
    Serde(#[from] durable_checkpoint::CheckpointError),

    /// A runtime invariant was violated (missing EXECUTION operation, unrecognized enum value
    /// on the wire). Fatal.
    #[error("illegal durable operation: {0}")]
    IllegalOperation(String),

    /// The checkpoint backend call failed; subject to the caller's own retry policy, not this
    /// operation's.
    #[error("checkpoint backend call failed: {0}")]
    Backend(String),

    /// Caller requested a wait shorter than the minimum durable wait duration.
    #[error("wait duration must be at least 1 second, got {0:?}")]
    InvalidWaitDuration(std::time::Duration),
}

impl DurableError {
    /// True for the execution-terminating variants: a corrupted or non-deterministic
    /// operation log, not a single operation's own business-level failure. The executor's
    /// failure path logs these at `error` level rather than `warn`, since they indicate a bug
    /// in the handler or the log itself rather than an ordinary step/invoke/callback failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DurableError::NonDeterministic { .. }
                | DurableError::Serde(_)
                | DurableError::IllegalOperation(_)
        )
    }
}
