//! `CompletionRegistry` — couples checkpoint-driven operation lifecycle to user waiters.
//!
//! A waiter's `get()` must not wake before the operation's SUCCEED/FAIL is durable: a crash
//! between wake and durability would break replay. So the only path that completes a slot is
//! the checkpoint-response handler examining a freshly merged, terminal [`Operation`] — never
//! the worker that ran the operation's body.

use durable_checkpoint::Operation;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct Slot {
    operation: Mutex<Option<Operation>>,
    notify: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            operation: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn complete(&self, operation: Operation) {
        let mut guard = self.operation.lock().unwrap();
        if guard.is_some() {
            return;
        }
        *guard = Some(operation);
        drop(guard);
        self.notify.notify_waiters();
    }

    fn peek(&self) -> Option<Operation> {
        self.operation.lock().unwrap().clone()
    }

    async fn wait(&self) -> Operation {
        loop {
            let notified = self.notify.notified();
            if let Some(op) = self.peek() {
                return op;
            }
            notified.await;
            if let Some(op) = self.peek() {
                return op;
            }
        }
    }
}

/// Per-execution table of one-shot completion slots, keyed by operation id.
///
/// Multiple waiters on the same id are all released on completion; the access serialization
/// is per-slot (a `Mutex` guarding that slot's `Option<Operation>`), not global, so unrelated
/// operations never contend with each other.
pub struct CompletionRegistry {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, id: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Mark `operation.id` complete with its terminal record. Idempotent: a slot completes
    /// at most once, so a duplicate terminal record observed twice (e.g. from an overlapping
    /// checkpoint response) is a no-op on the second call.
    pub fn complete(&self, operation: Operation) {
        self.slot_for(&operation.id).complete(operation);
    }

    /// True if `id`'s slot has already completed — used by `get()` to avoid the suspend path
    /// entirely when the answer is already cached.
    pub fn peek(&self, id: &str) -> Option<Operation> {
        self.slot_for(id).peek()
    }

    /// Block until `id`'s slot completes, returning the terminal [`Operation`].
    pub async fn wait(&self, id: &str) -> Operation {
        self.slot_for(id).wait().await
    }
}

impl Default for CompletionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durable_checkpoint::{OperationKind, OperationStatus};
    use std::time::Duration;

    fn succeeded(id: &str) -> Operation {
        let mut op = Operation::new(id.to_string(), OperationKind::Step);
        op.status = OperationStatus::Succeeded;
        op
    }

    #[test]
    fn peek_is_none_until_complete() {
        let registry = CompletionRegistry::new();
        assert!(registry.peek("1").is_none());
        registry.complete(succeeded("1"));
        assert!(registry.peek("1").is_some());
    }

    #[test]
    fn complete_is_idempotent_per_slot() {
        let registry = CompletionRegistry::new();
        registry.complete(succeeded("1"));
        let mut second = succeeded("1");
        second.attempt = 7;
        registry.complete(second);
        assert_eq!(registry.peek("1").unwrap().attempt, 0);
    }

    #[tokio::test]
    async fn wait_resolves_once_completed() {
        let registry = Arc::new(CompletionRegistry::new());
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait("1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.complete(succeeded("1"));
        let op = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(op.status, OperationStatus::Succeeded);
    }

    #[tokio::test]
    async fn wait_resolves_immediately_if_already_complete() {
        let registry = CompletionRegistry::new();
        registry.complete(succeeded("1"));
        let op = tokio::time::timeout(Duration::from_millis(50), registry.wait("1"))
            .await
            .unwrap();
        assert_eq!(op.id, "1");
    }

    #[tokio::test]
    async fn multiple_waiters_are_all_released() {
        let registry = Arc::new(CompletionRegistry::new());
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let registry = registry.clone();
            waiters.push(tokio::spawn(async move { registry.wait("1").await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.complete(succeeded("1"));
        for waiter in waiters {
            let op = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
            assert_eq!(op.status, OperationStatus::Succeeded);
        }
    }
}
