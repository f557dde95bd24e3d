//! Operation log data model.
//!
//! This module defines the durable record kept for every operation issued by a workflow
//! handler, and the wire-level update sent to the checkpoint backend to advance it. See
//! `crate::store` for how these records are merged as the backend responds.
//!
//! # Overview
//!
//! An **operation** is one row in an execution's durable log: a step, a wait, a chained
//! invocation, an external callback, or a nested child context. Every operation has an id
//! minted deterministically by a `Context` (see `durable_runtime::context`), a `kind` fixed
//! at creation, and a `status` that advances monotonically toward one of the terminal
//! states.
//!
//! ```text
//! PENDING --(delay elapses)--> READY --(picked up)--> STARTED --+--> SUCCEEDED
//!                                                                 +--> FAILED
//!                                                                 +--> CANCELLED
//!                                                                 +--> TIMED_OUT
//!                                                                 +--> STOPPED
//! ```
//!
//! # Example
//!
//! ```rust
//! use durable_checkpoint::operation::{Operation, OperationKind, OperationStatus};
//!
//! let op = Operation::new("1".to_string(), OperationKind::Step)
//!     .with_name(Some("charge-card".to_string()));
//! assert_eq!(op.status, OperationStatus::Pending);
//! assert!(!op.status.is_terminal());
//! ```

use serde::{Deserialize, Serialize};

/// The six durable-operation kinds the runtime coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    /// The single root record holding the execution's input payload.
    Execution,
    /// An inline user computation with retry semantics.
    Step,
    /// A durable sleep.
    Wait,
    /// A chained call to another worker function, executed by the backend.
    Invoke,
    /// An externally-completable slot.
    Callback,
    /// A nested child context; owns operations whose `parent_id` equals its own id.
    Context,
}

/// Lifecycle status of an operation.
///
/// `Succeeded`, `Failed`, `Cancelled`, `TimedOut` and `Stopped` are terminal: once a
/// local `OperationStore` observes one of these, no later backend response is allowed
/// to move the operation back to a non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    /// Waiting for a retry or wait delay to elapse.
    Pending,
    /// Delay elapsed; eligible to be picked up and advanced to `Started`.
    Ready,
    /// Running locally, or awaiting an external completion (invoke/callback).
    Started,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    Stopped,
}

impl OperationStatus {
    /// True for any of the five terminal statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Succeeded
                | OperationStatus::Failed
                | OperationStatus::Cancelled
                | OperationStatus::TimedOut
                | OperationStatus::Stopped
        )
    }
}

/// A typed error record that round-trips across languages via `error_type`.
///
/// Each stack frame is encoded `className|methodName|fileName|lineNumber`; this crate
/// treats frames as opaque strings and leaves interpretation to the host language's error
/// reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub error_data: String,
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

impl ErrorRecord {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            error_data: String::new(),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_stack_trace(mut self, frames: Vec<String>) -> Self {
        self.stack_trace = frames;
        self
    }
}

/// Wait-specific START details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitOptions {
    pub wait_seconds: u64,
}

/// Callback-specific START details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackOptions {
    pub timeout_seconds: u64,
    pub heartbeat_timeout_seconds: Option<u64>,
}

/// Context-specific details, set on the SUCCEED update when the child's result was too
/// large to inline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    pub replay_children: bool,
}

/// Invoke-specific START details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedInvokeOptions {
    pub function_name: String,
    pub timeout_seconds: Option<u64>,
    pub tenant_id: Option<String>,
}

/// Execution-level details: the handler's input, and (on large-result spill) the
/// out-of-band final result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    pub input_payload: Option<String>,
}

/// One durable record in an execution's operation log.
///
/// `Operation` is the type an `OperationStore` holds per id, and the type a
/// `CompletionRegistry` slot ultimately completes with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: OperationKind,
    pub name: Option<String>,
    pub status: OperationStatus,
    pub attempt: u32,
    pub result: Option<String>,
    pub error: Option<ErrorRecord>,
    pub scheduled_end_timestamp: Option<i64>,
    pub callback_id: Option<String>,
    pub next_schedule_timestamp: Option<i64>,
    pub wait_options: Option<WaitOptions>,
    pub callback_options: Option<CallbackOptions>,
    pub context_options: Option<ContextOptions>,
    pub chained_invoke_options: Option<ChainedInvokeOptions>,
    pub execution_details: Option<ExecutionDetails>,
}

impl Operation {
    /// Construct a fresh, `Pending`, attempt-0 operation with no kind-specific details set.
    pub fn new(id: String, kind: OperationKind) -> Self {
        Self {
            id,
            parent_id: None,
            kind,
            name: None,
            status: OperationStatus::Pending,
            attempt: 0,
            result: None,
            error: None,
            scheduled_end_timestamp: None,
            callback_id: None,
            next_schedule_timestamp: None,
            wait_options: None,
            callback_options: None,
            context_options: None,
            chained_invoke_options: None,
            execution_details: None,
        }
    }

    pub fn with_parent_id(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// The `(kind, name, parent_id)` tuple two records of the same id must agree on;
    /// a mismatch means a handler took a different code path on replay than it did
    /// originally.
    pub fn identity(&self) -> (OperationKind, Option<&str>, Option<&str>) {
        (self.kind, self.name.as_deref(), self.parent_id.as_deref())
    }
}

/// The action an `OperationUpdate` requests the backend to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateAction {
    Start,
    Succeed,
    Fail,
    Retry,
    Cancel,
}

/// A single state-transition request submitted to the `CheckpointBatcher`.
///
/// `OperationUpdate` is the unit the batcher coalesces into backend calls; a `None` id is
/// reserved for the empty poll update used to advance an execution with no local work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationUpdate {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub kind: Option<OperationKind>,
    pub name: Option<String>,
    pub action: UpdateAction,
    pub payload: Option<String>,
    pub error: Option<ErrorRecord>,
    pub wait_options: Option<WaitOptions>,
    pub callback_options: Option<CallbackOptions>,
    pub context_options: Option<ContextOptions>,
    pub chained_invoke_options: Option<ChainedInvokeOptions>,
    pub next_schedule_timestamp: Option<i64>,
}

impl OperationUpdate {
    /// The empty "poll" update: carries no id, bypasses batch size accounting, but still
    /// forces the batcher to make a backend round trip.
    pub fn poll() -> Self {
        Self {
            id: None,
            parent_id: None,
            kind: None,
            name: None,
            action: UpdateAction::Start,
            payload: None,
            error: None,
            wait_options: None,
            callback_options: None,
            context_options: None,
            chained_invoke_options: None,
            next_schedule_timestamp: None,
        }
    }

    pub fn is_poll(&self) -> bool {
        self.id.is_none()
    }

    /// Rough encoded-size estimate used by the batcher's byte bound. Uses JSON encoding
    /// as the estimator; the batcher only needs an upper bound, not an exact size.
    pub fn estimated_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
