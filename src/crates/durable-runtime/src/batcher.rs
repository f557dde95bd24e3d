//! `CheckpointBatcher` — consolidates operation updates into few, serialized backend calls.
//!
//! One open batch is tracked at a time, bounded by item count and estimated encoded bytes.
//! A single background task consumes completed batches in submission order, which gives
//! "at most one backend call in flight" and "additional flushes chain sequentially" for
//! free: the consumer `await`s each `checkpoint()` call before dequeuing the next one.

use crate::error::{DurableError, Result};
use durable_checkpoint::{CheckpointClient, Operation, OperationUpdate};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Anything that can accept freshly-terminal operations — implemented by
/// [`crate::completion::CompletionRegistry`]. Exists so this module doesn't need to depend
/// on the concrete registry type, only on the behavior it needs.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, operation: Operation);
}

impl CompletionSink for crate::completion::CompletionRegistry {
    fn complete(&self, operation: Operation) {
        crate::completion::CompletionRegistry::complete(self, operation)
    }
}

struct PendingItem {
    update: OperationUpdate,
    tx: oneshot::Sender<std::result::Result<(), Arc<DurableError>>>,
}

enum FlushMessage {
    Batch(VecDeque<PendingItem>),
    Barrier(oneshot::Sender<()>),
}

struct BatcherState {
    pending: VecDeque<PendingItem>,
    bytes: usize,
    generation: u64,
}

struct Shared {
    state: Mutex<BatcherState>,
    flush_tx: mpsc::UnboundedSender<FlushMessage>,
    flush_delay: Duration,
    max_bytes: usize,
    max_items: usize,
}

impl Shared {
    /// Drain whatever is currently pending and hand it to the consumer. No-op if empty.
    fn drain_and_flush(&self, state: &mut BatcherState) {
        if state.pending.is_empty() {
            return;
        }
        let drained = std::mem::take(&mut state.pending);
        state.bytes = 0;
        state.generation += 1;
        let _ = self.flush_tx.send(FlushMessage::Batch(drained));
    }
}

/// Size-and-time-bounded batcher serializing `OperationUpdate`s onto a single in-flight
/// `CheckpointClient::checkpoint` call per execution.
pub struct CheckpointBatcher {
    shared: Arc<Shared>,
}

impl CheckpointBatcher {
    pub fn new(
        client: Arc<dyn CheckpointClient>,
        execution_arn: String,
        initial_token: String,
        store: Arc<durable_checkpoint::OperationStore>,
        completions: Arc<dyn CompletionSink>,
        max_bytes: usize,
        max_items: usize,
        flush_delay: Duration,
    ) -> Self {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(BatcherState {
                pending: VecDeque::new(),
                bytes: 0,
                generation: 0,
            }),
            flush_tx,
            flush_delay,
            max_bytes,
            max_items,
        });

        let token = Arc::new(Mutex::new(initial_token));
        tokio::spawn(run_consumer(client, execution_arn, token, store, completions, flush_rx));

        Self { shared }
    }

    /// Submit an update, returning once the batch it lands in has been accepted (or has
    /// failed) at the backend.
    pub async fn submit(&self, update: OperationUpdate) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.append(PendingItem { update, tx });
        rx.await
            .map_err(|_| DurableError::Backend("checkpoint batcher shut down".to_string()))?
            .map_err(|e| DurableError::Backend(e.to_string()))
    }

    fn append(&self, item: PendingItem) {
        let mut state = self.shared.state.lock().unwrap();
        let is_poll = item.update.is_poll();
        let estimated = item.update.estimated_bytes();

        let would_exceed = !is_poll
            && !state.pending.is_empty()
            && (state.bytes + estimated > self.shared.max_bytes || state.pending.len() + 1 > self.shared.max_items);
        if would_exceed {
            self.shared.drain_and_flush(&mut state);
        }

        let starting_new_batch = state.pending.is_empty();
        state.bytes += estimated;
        state.pending.push_back(item);

        if is_poll {
            self.shared.drain_and_flush(&mut state);
        } else if starting_new_batch {
            let shared = self.shared.clone();
            let generation = state.generation;
            tokio::spawn(async move {
                tokio::time::sleep(shared.flush_delay).await;
                let mut state = shared.state.lock().unwrap();
                if state.generation == generation {
                    shared.drain_and_flush(&mut state);
                }
            });
        }
    }

    /// Flush the current batch and wait for every chained flush ahead of it to be applied.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            self.shared.drain_and_flush(&mut state);
        }
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.flush_tx.send(FlushMessage::Barrier(tx));
        let _ = rx.await;
    }
}

async fn run_consumer(
    client: Arc<dyn CheckpointClient>,
    execution_arn: String,
    token: Arc<Mutex<String>>,
    store: Arc<durable_checkpoint::OperationStore>,
    completions: Arc<dyn CompletionSink>,
    mut flush_rx: mpsc::UnboundedReceiver<FlushMessage>,
) {
    while let Some(message) = flush_rx.recv().await {
        let batch = match message {
            FlushMessage::Batch(batch) => batch,
            FlushMessage::Barrier(ack) => {
                let _ = ack.send(());
                continue;
            }
        };
        if batch.is_empty() {
            continue;
        }
        let current_token = token.lock().unwrap().clone();
        let updates: Vec<OperationUpdate> = batch.iter().map(|item| item.update.clone()).collect();

        match client.checkpoint(&execution_arn, &current_token, &updates).await {
            Ok(response) => {
                *token.lock().unwrap() = response.new_token;
                let merged = store.merge_all(response.new_operations);
                for operation in merged {
                    if operation.status.is_terminal() {
                        completions.complete(operation);
                    }
                }
                for item in batch {
                    let _ = item.tx.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "checkpoint batch failed, surfacing to callers");
                let shared_error = Arc::new(DurableError::from(e));
                for item in batch {
                    let _ = item.tx.send(Err(shared_error.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionRegistry;
    use durable_checkpoint::{InMemoryCheckpointClient, OperationKind, OperationStatus, UpdateAction};
    use durable_checkpoint::OperationStore;

    fn start_update(id: &str) -> OperationUpdate {
        OperationUpdate {
            id: Some(id.to_string()),
            parent_id: None,
            kind: Some(OperationKind::Step),
            name: Some("op".to_string()),
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

    fn make_batcher(max_items: usize) -> (Arc<CheckpointBatcher>, Arc<OperationStore>, Arc<CompletionRegistry>) {
        let client: Arc<dyn CheckpointClient> = Arc::new(InMemoryCheckpointClient::new());
        let store = Arc::new(OperationStore::new());
        let completions = Arc::new(CompletionRegistry::new());
        let batcher = Arc::new(CheckpointBatcher::new(
            client,
            "arn".to_string(),
            "0".to_string(),
            store.clone(),
            completions.clone(),
            750 * 1024,
            max_items,
            Duration::from_millis(20),
        ));
        (batcher, store, completions)
    }

    #[tokio::test]
    async fn single_submit_round_trips_via_the_flush_timer() {
        let (batcher, store, _completions) = make_batcher(500);
        batcher.submit(start_update("1")).await.unwrap();
        assert_eq!(store.get("1").unwrap().status, OperationStatus::Started);
    }

    #[tokio::test]
    async fn item_count_bound_forces_an_immediate_flush() {
        let (batcher, store, _completions) = make_batcher(1);
        // First submit opens a batch of size 1, which is already at max_items; the second
        // submit should force that batch out before joining a fresh one.
        let first = batcher.submit(start_update("1"));
        let second = batcher.submit(start_update("2"));
        let (r1, r2) = tokio::join!(first, second);
        r1.unwrap();
        r2.unwrap();
        assert!(store.get("1").is_some());
        assert!(store.get("2").is_some());
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_items() {
        let (batcher, store, _completions) = make_batcher(500);
        let submit = batcher.submit(start_update("1"));
        let shutdown = batcher.shutdown();
        let (submit_result, _) = tokio::join!(submit, shutdown);
        submit_result.unwrap();
        assert!(store.get("1").is_some());
    }
}
