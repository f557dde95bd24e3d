//! Top-level orchestration.
//!
//! `Executor::run` is the single entry point an embedding host calls once per invocation: it
//! materializes the local operation log, runs the user handler as a single worker activity,
//! and races the handler's own completion against the suspension signal fired once no local
//! activity remains. Whichever finishes first decides the outcome reported back to the host.
//!
//! Exception-based suspension is deliberately not used here: a user `catch`-all inside the
//! handler could otherwise swallow it. Racing an independent signal via `tokio::select!`
//! keeps suspension observable regardless of how the handler body is written.

use crate::activity::ActivityTracker;
use crate::batcher::CheckpointBatcher;
use crate::completion::CompletionRegistry;
use crate::config::ExecutorConfig;
use crate::context::Context;
use crate::error::{DurableError, Result};
use durable_checkpoint::{
    CheckpointClient, ErrorRecord, Operation, OperationKind, OperationStore, OperationUpdate,
    UpdateAction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// The result an invocation reports back to the host, mirroring the `{status, result, error}`
/// envelope of the entry interface.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// `result` is the codec-encoded return value, or empty if it was spilled via an
    /// EXECUTION-level checkpoint because it exceeded the response envelope budget.
    Succeeded(String),
    /// No local work remains; the host should re-invoke once a delay elapses or an external
    /// event lands.
    Pending,
    Failed(ErrorRecord),
}

/// Coordinates a single execution against a [`CheckpointClient`]. Cheap to construct; the
/// embedding host is expected to retain one per worker function and reuse it across
/// invocations.
pub struct Executor {
    client: Arc<dyn CheckpointClient>,
    config: Arc<ExecutorConfig>,
}

impl Executor {
    pub fn new(client: Arc<dyn CheckpointClient>, config: ExecutorConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Run one invocation. `initial_operations`/`initial_next_marker` are the entry payload's
    /// `initialExecutionState`; additional pages are fetched via `get_execution_state` while a
    /// marker remains. `handler` receives a fresh root [`Context`] and the deserialized
    /// EXECUTION payload.
    pub async fn run<In, Out, F, Fut>(
        &self,
        execution_arn: &str,
        token: &str,
        initial_operations: Vec<Operation>,
        initial_next_marker: Option<String>,
        handler: F,
    ) -> Result<ExecutionOutcome>
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: FnOnce(Context, In) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Out>> + Send + 'static,
    {
        let span = tracing::info_span!("durable_execution", execution_arn = %execution_arn);
        let _entered = span.enter();
        tracing::info!("executor starting");

        let mut operations = initial_operations;
        let mut marker = initial_next_marker;
        while let Some(m) = marker {
            let page = self
                .client
                .get_execution_state(execution_arn, token, Some(&m))
                .await?;
            operations.extend(page.operations);
            marker = page.next_marker;
        }

        let execution_op = operations
            .first()
            .cloned()
            .ok_or_else(|| DurableError::IllegalOperation("execution log is empty; expected an EXECUTION operation first".to_string()))?;
        if execution_op.kind != OperationKind::Execution {
            return Err(DurableError::IllegalOperation(format!(
                "expected the first operation to be EXECUTION, got {:?}",
                execution_op.kind
            )));
        }
        let input_payload = execution_op
            .execution_details
            .as_ref()
            .and_then(|details| details.input_payload.clone())
            .unwrap_or_else(|| "null".to_string());
        let input: In = self.config.codec.deserialize(&input_payload).map_err(DurableError::Serde)?;

        let store = Arc::new(OperationStore::from_operations(operations));
        let completions = Arc::new(CompletionRegistry::new());
        let activities = Arc::new(ActivityTracker::new());
        let batcher = Arc::new(CheckpointBatcher::new(
            self.client.clone(),
            execution_arn.to_string(),
            token.to_string(),
            store.clone(),
            completions.clone(),
            self.config.batch_max_bytes,
            self.config.batch_max_items,
            self.config.batch_flush_delay,
        ));
        let ctx = Context::root(store, batcher.clone(), completions, activities.clone(), self.config.clone());
        let handler_activity_id = ctx.governing_activity_id();

        let handler_task = tokio::spawn(async move { handler(ctx, input).await });

        tokio::select! {
            biased;
            joined = handler_task => {
                activities.deregister(handler_activity_id);
                let outcome = match joined {
                    Ok(Ok(value)) => self.report_success(&batcher, &execution_op, value).await,
                    Ok(Err(error)) => self.report_failure(&batcher, &execution_op, error).await,
                    Err(join_error) => {
                        self.report_failure(
                            &batcher,
                            &execution_op,
                            DurableError::IllegalOperation(format!("handler activity panicked: {join_error}")),
                        )
                        .await
                    }
                };
                batcher.shutdown().await;
                outcome
            }
            _ = activities.suspended() => {
                tracing::info!("execution suspended, no local activities remain");
                batcher.shutdown().await;
                Ok(ExecutionOutcome::Pending)
            }
        }
    }

    async fn report_success<Out: Serialize>(
        &self,
        batcher: &CheckpointBatcher,
        execution_op: &Operation,
        value: Out,
    ) -> Result<ExecutionOutcome> {
        let payload = self.config.codec.serialize(&value).map_err(DurableError::Serde)?;
        if payload.len() > self.config.max_response_bytes {
            tracing::info!(bytes = payload.len(), "result exceeds response envelope, spilling via checkpoint");
            let update = OperationUpdate {
                id: Some(execution_op.id.clone()),
                parent_id: None,
                kind: Some(OperationKind::Execution),
                name: execution_op.name.clone(),
                action: UpdateAction::Succeed,
                payload: Some(payload),
                error: None,
                wait_options: None,
                callback_options: None,
                context_options: None,
                chained_invoke_options: None,
                next_schedule_timestamp: None,
            };
            batcher.submit(update).await?;
            Ok(ExecutionOutcome::Succeeded(String::new()))
        } else {
            tracing::info!("execution succeeded");
            Ok(ExecutionOutcome::Succeeded(payload))
        }
    }

    async fn report_failure(
        &self,
        batcher: &CheckpointBatcher,
        execution_op: &Operation,
        error: DurableError,
    ) -> Result<ExecutionOutcome> {
        let error_record = to_execution_error_record(&error);
        if error.is_fatal() {
            tracing::error!(error = %error, "execution failed fatally, aborting without further retry");
        } else {
            tracing::warn!(error = %error, "execution failed");
        }
        let update = OperationUpdate {
            id: Some(execution_op.id.clone()),
            parent_id: None,
            kind: Some(OperationKind::Execution),
            name: execution_op.name.clone(),
            action: UpdateAction::Fail,
            payload: None,
            error: Some(error_record.clone()),
            wait_options: None,
            callback_options: None,
            context_options: None,
            chained_invoke_options: None,
            next_schedule_timestamp: None,
        };
        batcher.submit(update).await?;
        Ok(ExecutionOutcome::Failed(error_record))
    }
}

fn to_execution_error_record(error: &DurableError) -> ErrorRecord {
    match error {
        DurableError::StepFailed { error, .. } | DurableError::ChildContextFailed { error, .. } => error.clone(),
        DurableError::InvokeNotSucceeded { error: Some(error), .. }
        | DurableError::CallbackNotSucceeded { error: Some(error), .. } => error.clone(),
        other => ErrorRecord::new("DurableError", other.to_string()),
    }
}
