//! `CheckpointClient` — the backend transport contract.
//!
//! The coordination core never talks HTTP/gRPC directly; it only depends on this trait.
//! Wire encoding, credentials, and the backend endpoint are host concerns this crate does
//! not take a position on.

use crate::error::Result;
use crate::operation::{Operation, OperationUpdate};
use async_trait::async_trait;

/// Response to a `checkpoint` call: the fresh optimistic-concurrency token and whatever new
/// operation state the backend is now aware of as a result of the batch.
#[derive(Debug, Clone)]
pub struct CheckpointResponse {
    pub new_token: String,
    pub new_operations: Vec<Operation>,
}

/// Response to a `get_execution_state` call.
#[derive(Debug, Clone)]
pub struct ExecutionStatePage {
    pub operations: Vec<Operation>,
    pub next_marker: Option<String>,
}

/// The backend checkpoint service, as the coordination core sees it.
///
/// Implementations do not retry internally: a failed `checkpoint` call is surfaced to the
/// caller (the `CheckpointBatcher`), which fails every future in the batch and lets the
/// next `submit` retry against the unchanged token.
#[async_trait]
pub trait CheckpointClient: Send + Sync {
    /// Atomically apply a batch of updates, or fail the whole batch.
    async fn checkpoint(
        &self,
        execution_arn: &str,
        token: &str,
        updates: &[OperationUpdate],
    ) -> Result<CheckpointResponse>;

    /// Fetch one page of an execution's operation log, for hydrating large initial states.
    async fn get_execution_state(
        &self,
        execution_arn: &str,
        token: &str,
        marker: Option<&str>,
    ) -> Result<ExecutionStatePage>;
}

#[cfg(any(test, feature = "test-util"))]
pub use test_util::InMemoryCheckpointClient;

#[cfg(any(test, feature = "test-util"))]
mod test_util {
    use super::*;
    use crate::operation::{OperationKind, OperationStatus, UpdateAction};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A fully in-process `CheckpointClient` test double.
    ///
    /// Tracks a monotonic token, applies `OperationUpdate`s to its own operation table, and
    /// advances `Wait`/retry-pending operations only when the test explicitly moves
    /// simulated time forward via `advance_time`.
    pub struct InMemoryCheckpointClient {
        state: Mutex<Vec<Operation>>,
        token_counter: AtomicU64,
        now: AtomicU64,
        pub fail_next: AtomicBool,
    }

    impl Default for InMemoryCheckpointClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryCheckpointClient {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(Vec::new()),
                token_counter: AtomicU64::new(0),
                now: AtomicU64::new(0),
                fail_next: AtomicBool::new(false),
            }
        }

        /// Seed the execution's log, e.g. with the initial `Execution` operation.
        pub fn seed(&self, operations: Vec<Operation>) {
            *self.state.lock().unwrap() = operations;
        }

        /// Advance the client's simulated clock, making any `Wait`/pending-retry operation
        /// whose deadline has passed observable as `Succeeded`/`Ready` on the next call.
        pub fn advance_time(&self, seconds: u64) {
            self.now.fetch_add(seconds, Ordering::SeqCst);
            let now = self.now.load(Ordering::SeqCst) as i64;
            let mut state = self.state.lock().unwrap();
            for op in state.iter_mut() {
                // A Wait has no READY/PENDING leg of its own: it goes STARTED on Start and
                // sits there until its deadline passes. Retry-pending steps/invokes/callbacks
                // go the other way, sitting PENDING until their next_schedule_timestamp.
                if op.kind == OperationKind::Wait {
                    if op.status == OperationStatus::Started
                        && op.scheduled_end_timestamp.map(|t| t <= now).unwrap_or(false)
                    {
                        op.status = OperationStatus::Succeeded;
                        op.result = op.result.clone().or(Some(String::new()));
                    }
                } else if op.status == OperationStatus::Pending
                    && op.next_schedule_timestamp.map(|t| t <= now).unwrap_or(false)
                {
                    op.status = OperationStatus::Ready;
                }
            }
        }

        pub fn current_token(&self) -> String {
            self.token_counter.load(Ordering::SeqCst).to_string()
        }

        fn apply(&self, state: &mut Vec<Operation>, update: &OperationUpdate) {
            let Some(id) = update.id.clone() else { return };
            let now = self.now.load(Ordering::SeqCst) as i64;
            let existing = state.iter().position(|op| op.id == id);
            match update.action {
                UpdateAction::Start => {
                    let mut op = match existing {
                        Some(idx) => state[idx].clone(),
                        None => Operation::new(id.clone(), update.kind.unwrap_or(OperationKind::Step)),
                    };
                    op.parent_id = update.parent_id.clone();
                    op.name = update.name.clone();
                    op.status = OperationStatus::Started;
                    op.wait_options = update.wait_options.clone();
                    op.callback_options = update.callback_options.clone();
                    op.chained_invoke_options = update.chained_invoke_options.clone();
                    if let Some(wait) = &update.wait_options {
                        op.scheduled_end_timestamp = Some(now + wait.wait_seconds as i64);
                    }
                    if op.kind == OperationKind::Callback && op.callback_id.is_none() {
                        op.callback_id = Some(format!("callback-{id}"));
                    }
                    match existing {
                        Some(idx) => state[idx] = op,
                        None => state.push(op),
                    }
                }
                UpdateAction::Succeed => {
                    if let Some(idx) = existing {
                        state[idx].status = OperationStatus::Succeeded;
                        state[idx].result = update.payload.clone();
                        if let Some(opts) = update.context_options {
                            state[idx].context_options = Some(opts);
                        }
                    }
                }
                UpdateAction::Fail => {
                    if let Some(idx) = existing {
                        state[idx].status = OperationStatus::Failed;
                        state[idx].error = update.error.clone();
                    }
                }
                UpdateAction::Retry => {
                    if let Some(idx) = existing {
                        state[idx].status = OperationStatus::Pending;
                        state[idx].attempt += 1;
                        state[idx].next_schedule_timestamp = update.next_schedule_timestamp;
                        state[idx].error = update.error.clone();
                    }
                }
                UpdateAction::Cancel => {
                    if let Some(idx) = existing {
                        state[idx].status = OperationStatus::Cancelled;
                    }
                }
            }
        }
    }

    #[async_trait]
    impl CheckpointClient for InMemoryCheckpointClient {
        async fn checkpoint(
            &self,
            _execution_arn: &str,
            token: &str,
            updates: &[OperationUpdate],
        ) -> Result<CheckpointResponse> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(crate::error::CheckpointError::Transport(
                    "simulated transport failure".to_string(),
                ));
            }
            if token != self.current_token() {
                return Err(crate::error::CheckpointError::StaleToken);
            }
            let mut state = self.state.lock().unwrap();
            for update in updates {
                if !update.is_poll() {
                    self.apply(&mut state, update);
                }
            }
            self.token_counter.fetch_add(1, Ordering::SeqCst);
            Ok(CheckpointResponse {
                new_token: self.token_counter.load(Ordering::SeqCst).to_string(),
                new_operations: state.clone(),
            })
        }

        async fn get_execution_state(
            &self,
            _execution_arn: &str,
            _token: &str,
            _marker: Option<&str>,
        ) -> Result<ExecutionStatePage> {
            Ok(ExecutionStatePage {
                operations: self.state.lock().unwrap().clone(),
                next_marker: None,
            })
        }
    }
}
