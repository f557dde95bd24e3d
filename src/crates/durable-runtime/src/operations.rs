//! Per-kind durable operation semantics: Step, Wait, Invoke, Callback, ChildContext.
//!
//! Every kind shares the same two-phase shape: mint an id, consult the store
//! (`Context::lookup_and_maybe_leave_replay`), and either replay a
//! cached terminal result or do the kind-specific work. Unlike a multi-language SDK, there is
//! no separate non-blocking `execute()` followed by a blocking `get()` call here — Rust's
//! `async`/`await` already gives callers that choice via when they `.await` the returned
//! future, so each operation below is a single `async fn` that does both steps.

use crate::activity::ActivityKind;
use crate::context::Context;
use crate::error::{DurableError, Result};
use crate::retry::{RetryDecision, RetryPolicy};
use durable_checkpoint::{
    CallbackOptions, ChainedInvokeOptions, ErrorRecord, Operation, OperationKind, OperationStatus,
    OperationUpdate, UpdateAction, WaitOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn validate_identity(op: &Operation, kind: OperationKind, name: &str, parent_id: Option<&str>) -> Result<()> {
    let (op_kind, op_name, op_parent) = op.identity();
    if op_kind != kind || op_name != Some(name) || op_parent != parent_id {
        return Err(DurableError::NonDeterministic {
            operation_id: op.id.clone(),
            detail: format!(
                "id '{}' previously recorded as ({op_kind:?}, {op_name:?}, {op_parent:?}) but this replay requests ({kind:?}, {:?}, {parent_id:?})",
                op.id, Some(name)
            ),
        });
    }
    Ok(())
}

fn bare_update(id: &str, parent_id: Option<&str>, kind: OperationKind, name: &str, action: UpdateAction) -> OperationUpdate {
    OperationUpdate {
        id: Some(id.to_string()),
        parent_id: parent_id.map(str::to_string),
        kind: Some(kind),
        name: Some(name.to_string()),
        action,
        payload: None,
        error: None,
        wait_options: None,
        callback_options: None,
        context_options: None,
        chained_invoke_options: None,
        next_schedule_timestamp: None,
    }
}

impl Context {
    /// True while a replay-path log at this point would just be the same emission the last
    /// invocation already made. `SPEC_FULL §10.1`/§4.9: replay-path logging is suppressed
    /// while `suppress_replay_logs` is set and this context is still reconstructing.
    fn suppressing_replay_logs(&self) -> bool {
        self.config().suppress_replay_logs && self.is_replaying()
    }

    /// Error record conversion a step/invoke/callback/child-context body's user-level error
    /// goes through when it isn't already one. Kept as a method so call sites read uniformly.
    fn missing_error_record(&self, op_id: &str) -> ErrorRecord {
        ErrorRecord::new("Unknown", format!("operation '{op_id}' is terminal with no recorded error"))
    }

    fn decode_step_terminal<T: DeserializeOwned>(&self, op: &Operation) -> Result<T> {
        match op.status {
            OperationStatus::Succeeded => self
                .config()
                .codec
                .deserialize(op.result.as_deref().unwrap_or("null"))
                .map_err(DurableError::Serde),
            OperationStatus::Failed => Err(DurableError::StepFailed {
                operation_id: op.id.clone(),
                error: op.error.clone().unwrap_or_else(|| self.missing_error_record(&op.id)),
            }),
            other => Err(DurableError::IllegalOperation(format!(
                "step '{}' ended in unexpected status {other:?}",
                op.id
            ))),
        }
    }

    fn decode_context_terminal<T: DeserializeOwned>(&self, op: &Operation) -> Result<T> {
        match op.status {
            OperationStatus::Succeeded => self
                .config()
                .codec
                .deserialize(op.result.as_deref().unwrap_or("null"))
                .map_err(DurableError::Serde),
            OperationStatus::Failed => Err(DurableError::ChildContextFailed {
                operation_id: op.id.clone(),
                error: op.error.clone().unwrap_or_else(|| self.missing_error_record(&op.id)),
            }),
            other => Err(DurableError::IllegalOperation(format!(
                "child context '{}' ended in unexpected status {other:?}",
                op.id
            ))),
        }
    }

    fn decode_invoke_terminal<T: DeserializeOwned>(&self, op: &Operation) -> Result<T> {
        match op.status {
            OperationStatus::Succeeded => self
                .config()
                .codec
                .deserialize(op.result.as_deref().unwrap_or("null"))
                .map_err(DurableError::Serde),
            other => Err(DurableError::InvokeNotSucceeded {
                operation_id: op.id.clone(),
                status: other,
                error: op.error.clone(),
            }),
        }
    }

    fn decode_callback_terminal<T: DeserializeOwned>(&self, op: &Operation) -> Result<T> {
        match op.status {
            OperationStatus::Succeeded => self
                .config()
                .codec
                .deserialize(op.result.as_deref().unwrap_or("null"))
                .map_err(DurableError::Serde),
            other => Err(DurableError::CallbackNotSucceeded {
                operation_id: op.id.clone(),
                status: other,
                error: op.error.clone(),
            }),
        }
    }

    /// Run an inline computation with retry. `body` receives the 0-indexed attempt number;
    /// `at_most_once` selects `AT_MOST_ONCE_PER_RETRY` (raise `StepInterrupted` on a STARTED
    /// replay) over the default `AT_LEAST_ONCE_PER_RETRY` (re-run from START on replay).
    pub async fn step<T, F, Fut>(&self, name: &str, retry: Option<RetryPolicy>, at_most_once: bool, body: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, ErrorRecord>>,
    {
        let id = self.mint_id();
        let cached = self.lookup_and_maybe_leave_replay(&id);
        if let Some(op) = &cached {
            validate_identity(op, OperationKind::Step, name, self.own_id())?;
            if op.status.is_terminal() {
                if !self.suppressing_replay_logs() {
                    tracing::debug!(operation_id = %id, kind = "step", "replaying cached terminal result");
                }
                return self.decode_step_terminal(op);
            }
            if at_most_once && op.status == OperationStatus::Started {
                tracing::warn!(operation_id = %id, kind = "step", "at-most-once step found STARTED on replay");
                return Err(DurableError::StepInterrupted { operation_id: id });
            }
        } else if !self.suppressing_replay_logs() {
            tracing::debug!(operation_id = %id, kind = "step", name, "minted operation");
        }

        let activity_id = self.next_activity_id();
        self.activities().register(activity_id, ActivityKind::Worker);
        let outcome = self
            .run_step_loop(&id, name, retry.unwrap_or_else(|| self.config().retry_default.clone()), cached, body)
            .await;
        self.activities().deregister(activity_id);
        outcome
    }

    async fn run_step_loop<T, F, Fut>(
        &self,
        id: &str,
        name: &str,
        retry: RetryPolicy,
        cached: Option<Operation>,
        body: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, ErrorRecord>>,
    {
        let mut attempt = cached.as_ref().map(|op| op.attempt).unwrap_or(0);
        if cached.is_none() {
            let op = Operation::new(id.to_string(), OperationKind::Step)
                .with_name(Some(name.to_string()))
                .with_parent_id(self.own_id().map(str::to_string));
            self.store().insert_new(op);
            self.batcher()
                .submit(bare_update(id, self.own_id(), OperationKind::Step, name, UpdateAction::Start))
                .await?;
        }

        loop {
            match body(attempt).await {
                Ok(value) => {
                    let payload = self.config().codec.serialize(&value).map_err(DurableError::Serde)?;
                    let mut update = bare_update(id, self.own_id(), OperationKind::Step, name, UpdateAction::Succeed);
                    update.payload = Some(payload);
                    self.batcher().submit(update).await?;
                    let op = self.completions().wait(id).await;
                    return self.decode_step_terminal(&op);
                }
                Err(error) => match retry.decide(&error, attempt) {
                    RetryDecision::Retry { delay } => {
                        tracing::warn!(
                            operation_id = %id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error.error_message,
                            "step failed, retrying"
                        );
                        let mut update = bare_update(id, self.own_id(), OperationKind::Step, name, UpdateAction::Retry);
                        update.error = Some(error);
                        update.next_schedule_timestamp = Some(now_millis() + delay.as_millis() as i64);
                        self.batcher().submit(update).await?;
                        // In-process, the step's worker activity stays registered through the
                        // delay: nothing else needs to observe suspension for a local sleep.
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Stop => {
                        tracing::warn!(operation_id = %id, attempt, error = %error.error_message, "step exhausted retries");
                        let mut update = bare_update(id, self.own_id(), OperationKind::Step, name, UpdateAction::Fail);
                        update.error = Some(error);
                        self.batcher().submit(update).await?;
                        let op = self.completions().wait(id).await;
                        return self.decode_step_terminal(&op);
                    }
                },
            }
        }
    }

    /// Durable sleep. `duration` must be at least 1 second. Spawns no worker activity: the
    /// calling context's own governing activity is what suspension waits on.
    pub async fn wait(&self, name: Option<&str>, duration: Duration) -> Result<()> {
        if duration < Duration::from_secs(1) {
            return Err(DurableError::InvalidWaitDuration(duration));
        }
        let wait_name = name.unwrap_or("wait");
        let id = self.mint_id();
        let cached = self.lookup_and_maybe_leave_replay(&id);
        if let Some(op) = &cached {
            validate_identity(op, OperationKind::Wait, wait_name, self.own_id())?;
            if op.status.is_terminal() {
                if !self.suppressing_replay_logs() {
                    tracing::debug!(operation_id = %id, kind = "wait", "replaying already-elapsed wait");
                }
                return Ok(());
            }
        } else {
            let scheduled_end = now_millis() + duration.as_millis() as i64;
            let mut op = Operation::new(id.clone(), OperationKind::Wait)
                .with_name(Some(wait_name.to_string()))
                .with_parent_id(self.own_id().map(str::to_string));
            op.scheduled_end_timestamp = Some(scheduled_end);
            op.wait_options = Some(WaitOptions { wait_seconds: duration.as_secs() });
            self.store().insert_new(op);

            let mut update = bare_update(&id, self.own_id(), OperationKind::Wait, wait_name, UpdateAction::Start);
            update.wait_options = Some(WaitOptions { wait_seconds: duration.as_secs() });
            update.next_schedule_timestamp = Some(scheduled_end);
            self.batcher().submit(update).await?;
            if !self.suppressing_replay_logs() {
                tracing::debug!(operation_id = %id, kind = "wait", seconds = duration.as_secs(), "minted operation");
            }
        }

        let fired = self.activities().deregister(self.governing_activity_id());
        if !fired {
            crate::poller::spawn_poll_loop(self.shared.clone(), id.clone());
        }
        let operation = self.completions().wait(&id).await;
        self.activities().register(self.governing_activity_id(), ActivityKind::Context);
        tracing::debug!(operation_id = %id, kind = "wait", "slot completed");
        match operation.status {
            OperationStatus::Succeeded => Ok(()),
            other => Err(DurableError::IllegalOperation(format!("wait '{id}' ended in unexpected status {other:?}"))),
        }
    }

    /// Chained call to another worker function, executed by the backend. Terminal statuses
    /// other than SUCCEEDED surface as `InvokeNotSucceeded`.
    pub async fn invoke<T>(
        &self,
        name: &str,
        function_name: &str,
        payload: &impl Serialize,
        timeout: Option<Duration>,
        tenant_id: Option<String>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let id = self.mint_id();
        let cached = self.lookup_and_maybe_leave_replay(&id);
        if let Some(op) = &cached {
            validate_identity(op, OperationKind::Invoke, name, self.own_id())?;
            if op.status.is_terminal() {
                if !self.suppressing_replay_logs() {
                    tracing::debug!(operation_id = %id, kind = "invoke", "replaying cached terminal result");
                }
                return self.decode_invoke_terminal(op);
            }
        } else {
            if !self.suppressing_replay_logs() {
                tracing::debug!(operation_id = %id, kind = "invoke", function_name, "minted operation");
            }
            let encoded = self.config().codec.serialize(payload).map_err(DurableError::Serde)?;
            let mut op = Operation::new(id.clone(), OperationKind::Invoke)
                .with_name(Some(name.to_string()))
                .with_parent_id(self.own_id().map(str::to_string));
            op.chained_invoke_options = Some(ChainedInvokeOptions {
                function_name: function_name.to_string(),
                timeout_seconds: timeout.map(|d| d.as_secs()),
                tenant_id: tenant_id.clone(),
            });
            self.store().insert_new(op);

            let mut update = bare_update(&id, self.own_id(), OperationKind::Invoke, name, UpdateAction::Start);
            update.payload = Some(encoded);
            update.chained_invoke_options = Some(ChainedInvokeOptions {
                function_name: function_name.to_string(),
                timeout_seconds: timeout.map(|d| d.as_secs()),
                tenant_id,
            });
            self.batcher().submit(update).await?;
        }

        let activity_id = self.next_activity_id();
        self.activities().register(activity_id, ActivityKind::Worker);
        let fired = self.activities().deregister(activity_id);
        if !fired {
            crate::poller::spawn_poll_loop(self.shared.clone(), id.clone());
        }
        let operation = self.completions().wait(&id).await;
        self.decode_invoke_terminal(&operation)
    }

    /// Create an externally-completable callback. Returns a handle carrying the
    /// backend-assigned `callback_id` to hand off to an external system; block on its result
    /// with [`Context::callback_get`].
    pub async fn callback(&self, name: &str, timeout: Duration, heartbeat_timeout: Option<Duration>) -> Result<CallbackHandle> {
        let id = self.mint_id();
        let cached = self.lookup_and_maybe_leave_replay(&id);
        let activity_id = self.next_activity_id();
        self.activities().register(activity_id, ActivityKind::Worker);

        if let Some(op) = &cached {
            validate_identity(op, OperationKind::Callback, name, self.own_id())?;
            return Ok(CallbackHandle {
                id,
                activity_id,
                callback_id: op.callback_id.clone(),
            });
        }

        let mut op = Operation::new(id.clone(), OperationKind::Callback)
            .with_name(Some(name.to_string()))
            .with_parent_id(self.own_id().map(str::to_string));
        op.callback_options = Some(CallbackOptions {
            timeout_seconds: timeout.as_secs(),
            heartbeat_timeout_seconds: heartbeat_timeout.map(|d| d.as_secs()),
        });
        self.store().insert_new(op);

        let mut update = bare_update(&id, self.own_id(), OperationKind::Callback, name, UpdateAction::Start);
        update.callback_options = Some(CallbackOptions {
            timeout_seconds: timeout.as_secs(),
            heartbeat_timeout_seconds: heartbeat_timeout.map(|d| d.as_secs()),
        });
        self.batcher().submit(update).await?;

        let callback_id = self.store().get(&id).and_then(|op| op.callback_id);
        Ok(CallbackHandle { id, activity_id, callback_id })
    }

    /// Block until `handle`'s callback is completed by an external system.
    pub async fn callback_get<T: DeserializeOwned>(&self, handle: CallbackHandle) -> Result<T> {
        if let Some(op) = self.store().get(&handle.id) {
            if op.status.is_terminal() {
                self.activities().deregister(handle.activity_id);
                return self.decode_callback_terminal(&op);
            }
        }
        let fired = self.activities().deregister(handle.activity_id);
        if !fired {
            crate::poller::spawn_poll_loop(self.shared.clone(), handle.id.clone());
        }
        let operation = self.completions().wait(&handle.id).await;
        self.decode_callback_terminal(&operation)
    }

    /// Run `body` as a nested child context. The child gets its own id prefix and replay
    /// flag; its result is recorded as a SUCCEED/FAIL on this CONTEXT operation.
    pub async fn child_context<T, F, Fut>(&self, name: &str, body: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = self.mint_id();
        let cached = self.lookup_and_maybe_leave_replay(&id);
        if let Some(op) = &cached {
            validate_identity(op, OperationKind::Context, name, self.own_id())?;
            if op.status.is_terminal() {
                if !self.suppressing_replay_logs() {
                    tracing::debug!(operation_id = %id, kind = "context", "replaying cached terminal result");
                }
                return self.decode_context_terminal(op);
            }
        } else {
            if !self.suppressing_replay_logs() {
                tracing::debug!(operation_id = %id, kind = "context", name, "minted operation");
            }
            let op = Operation::new(id.clone(), OperationKind::Context)
                .with_name(Some(name.to_string()))
                .with_parent_id(self.own_id().map(str::to_string));
            self.store().insert_new(op);
            self.batcher()
                .submit(bare_update(&id, self.own_id(), OperationKind::Context, name, UpdateAction::Start))
                .await?;
        }

        let child_ctx = self.child(id.clone());
        let child_activity_id = child_ctx.governing_activity_id();
        // A context that has only dispatched a child and is awaiting it is not itself doing
        // local work; deregister this context's own presence for the span of the await so a
        // fan-out of children that all suspend (e.g. on a Wait) lets suspension fire, the same
        // way a direct `wait()` call would. Re-registered once the child's body resumes here,
        // whether it returned a value or suspension never fired and this simply replays.
        self.activities().deregister(self.governing_activity_id());
        let outcome = body(child_ctx).await;
        self.activities().register(self.governing_activity_id(), ActivityKind::Context);
        self.activities().deregister(child_activity_id);

        match outcome {
            Ok(value) => {
                let payload = self.config().codec.serialize(&value).map_err(DurableError::Serde)?;
                let mut update = bare_update(&id, self.own_id(), OperationKind::Context, name, UpdateAction::Succeed);
                update.payload = Some(payload);
                self.batcher().submit(update).await?;
                let op = self.completions().wait(&id).await;
                self.decode_context_terminal(&op)
            }
            Err(error) => {
                let error_record = to_error_record(&error);
                let mut update = bare_update(&id, self.own_id(), OperationKind::Context, name, UpdateAction::Fail);
                update.error = Some(error_record.clone());
                self.batcher().submit(update).await?;
                self.completions().wait(&id).await;
                Err(DurableError::ChildContextFailed { operation_id: id, error: error_record })
            }
        }
    }
}

fn to_error_record(error: &DurableError) -> ErrorRecord {
    match error {
        DurableError::StepFailed { error, .. }
        | DurableError::ChildContextFailed { error, .. } => error.clone(),
        DurableError::InvokeNotSucceeded { error: Some(error), .. }
        | DurableError::CallbackNotSucceeded { error: Some(error), .. } => error.clone(),
        other => ErrorRecord::new("DurableError", other.to_string()),
    }
}

/// A handle to a pending externally-completable callback, carrying the id an external system
/// needs to complete it.
pub struct CallbackHandle {
    id: String,
    activity_id: u64,
    pub callback_id: Option<String>,
}

impl CallbackHandle {
    pub fn operation_id(&self) -> &str {
        &self.id
    }
}

/// Wait for every future to run to completion, then return their results in order, or the
/// first failure (in the original future order) if any failed. Uses `join_all` rather than
/// `try_join_all` specifically so a failing future never cancels its siblings: every branch is
/// always polled to completion before this returns.
pub async fn all_of<T>(futures: Vec<impl Future<Output = Result<T>>>) -> Result<Vec<T>> {
    let results = futures::future::join_all(futures).await;
    let mut values = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(error) => return Err(error),
        }
    }
    Ok(values)
}

/// Returns the first future to resolve successfully; if none do, returns the last error.
pub async fn any_of<T>(futures: Vec<impl Future<Output = Result<T>> + Unpin>) -> Result<T> {
    let mut pending = futures;
    let mut last_err = None;
    loop {
        if pending.is_empty() {
            return Err(last_err.unwrap_or_else(|| DurableError::IllegalOperation("any_of called with no futures".to_string())));
        }
        let (result, _index, remaining) = futures::future::select_all(pending).await;
        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                pending = remaining;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn all_of_polls_every_future_to_completion_even_when_one_fails() {
        let completed = Arc::new(AtomicUsize::new(0));
        let futures: Vec<Pin<Box<dyn Future<Output = Result<usize>> + Send>>> = (0..3)
            .map(|i| {
                let completed = completed.clone();
                Box::pin(async move {
                    // The eventual failure resolves fastest; the others must still run to
                    // completion rather than being cancelled by it.
                    tokio::time::sleep(Duration::from_millis(if i == 1 { 1 } else { 20 })).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        Err(DurableError::IllegalOperation("boom".to_string()))
                    } else {
                        Ok(i)
                    }
                }) as Pin<Box<dyn Future<Output = Result<usize>> + Send>>
            })
            .collect();

        let result = all_of(futures).await;
        assert!(matches!(result, Err(DurableError::IllegalOperation(_))));
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn all_of_returns_values_in_original_order_on_success() {
        let futures: Vec<Pin<Box<dyn Future<Output = Result<usize>> + Send>>> = (0..3)
            .map(|i| Box::pin(async move { Ok(i) }) as Pin<Box<dyn Future<Output = Result<usize>> + Send>>)
            .collect();
        let result = all_of(futures).await.unwrap();
        assert_eq!(result, vec![0, 1, 2]);
    }
}
