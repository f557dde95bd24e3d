//! `Context` — the user-facing handle: mints operation ids, tracks replay, issues operations.
//!
//! Every context, root or child, owns an independent id counter and replay flag. A child's
//! ids are prefixed with its own id (`"1-2-1"` for a child of a child of root's second
//! operation); this lets nested contexts mint ids without coordinating with their parent.

use crate::activity::{ActivityKind, ActivityTracker};
use crate::batcher::CheckpointBatcher;
use crate::completion::CompletionRegistry;
use crate::config::ExecutorConfig;
use durable_checkpoint::{Operation, OperationStore};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-execution handle shared by the root context and every child context it spawns.
pub(crate) struct Shared {
    pub(crate) store: Arc<OperationStore>,
    pub(crate) batcher: Arc<CheckpointBatcher>,
    pub(crate) completions: Arc<CompletionRegistry>,
    pub(crate) activities: Arc<ActivityTracker>,
    pub(crate) config: Arc<ExecutorConfig>,
    activity_ids: AtomicU64,
}

/// A handle through which user code issues durable operations: `step`, `wait`, `invoke`,
/// `callback`, and `child_context`.
pub struct Context {
    id_prefix: Option<String>,
    counter: AtomicU64,
    is_replaying: AtomicBool,
    /// The activity id registered on this context's behalf — the handler function itself,
    /// for root, or the child function, for a child context. `wait()` and other no-local-work
    /// blocking points deregister this id rather than minting a fresh one, since it is this
    /// context's own presence that holds up suspension while it blocks.
    governing_activity_id: u64,
    pub(crate) shared: Arc<Shared>,
}

impl Context {
    /// Construct the root context for a fresh executor invocation. Registers the handler's
    /// own CONTEXT activity as a side effect, matching the executor's "submit the user
    /// handler as a single activity" step.
    pub fn root(
        store: Arc<OperationStore>,
        batcher: Arc<CheckpointBatcher>,
        completions: Arc<CompletionRegistry>,
        activities: Arc<ActivityTracker>,
        config: Arc<ExecutorConfig>,
    ) -> Self {
        let is_replaying = store.has_any_non_execution_operation();
        let shared = Arc::new(Shared {
            store,
            batcher,
            completions,
            activities,
            config,
            activity_ids: AtomicU64::new(0),
        });
        let governing_activity_id = shared.activity_ids.fetch_add(1, Ordering::SeqCst);
        shared.activities.register(governing_activity_id, ActivityKind::Context);
        Self {
            id_prefix: None,
            counter: AtomicU64::new(0),
            is_replaying: AtomicBool::new(is_replaying),
            governing_activity_id,
            shared,
        }
    }

    /// Construct a child context carrying `child_id` as its id prefix, sharing every
    /// per-execution component with its parent, and registering its own governing activity.
    pub(crate) fn child(&self, child_id: String) -> Self {
        let is_replaying = self.shared.store.has_children_of(&child_id);
        let governing_activity_id = self.shared.activity_ids.fetch_add(1, Ordering::SeqCst);
        self.shared.activities.register(governing_activity_id, ActivityKind::Context);
        Self {
            id_prefix: Some(child_id),
            counter: AtomicU64::new(0),
            is_replaying: AtomicBool::new(is_replaying),
            governing_activity_id,
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn governing_activity_id(&self) -> u64 {
        self.governing_activity_id
    }

    /// Mint the next operation id for this context, in program order.
    pub(crate) fn mint_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.id_prefix {
            None => n.to_string(),
            Some(prefix) => format!("{prefix}-{n}"),
        }
    }

    /// Id of this context itself, for children to prefix against. `None` for root.
    pub(crate) fn own_id(&self) -> Option<&str> {
        self.id_prefix.as_deref()
    }

    /// Allocate a fresh activity id, unique for the whole execution (shared across every
    /// context descended from the same root).
    pub(crate) fn next_activity_id(&self) -> u64 {
        self.shared.activity_ids.fetch_add(1, Ordering::SeqCst)
    }

    pub fn is_replaying(&self) -> bool {
        self.is_replaying.load(Ordering::SeqCst)
    }

    /// Look up the cached record for `id`. If it is missing or non-terminal, this context
    /// leaves replay mode (one-way: once false, this never flips back to true).
    pub(crate) fn lookup_and_maybe_leave_replay(&self, id: &str) -> Option<Operation> {
        let cached = self.shared.store.get(id);
        let still_reconstructing = matches!(&cached, Some(op) if op.status.is_terminal());
        if !still_reconstructing {
            self.is_replaying.store(false, Ordering::SeqCst);
        }
        cached
    }

    pub(crate) fn store(&self) -> &OperationStore {
        &self.shared.store
    }

    pub(crate) fn batcher(&self) -> &CheckpointBatcher {
        &self.shared.batcher
    }

    pub(crate) fn completions(&self) -> &CompletionRegistry {
        &self.shared.completions
    }

    pub(crate) fn activities(&self) -> &ActivityTracker {
        &self.shared.activities
    }

    pub(crate) fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use durable_checkpoint::{CheckpointClient, InMemoryCheckpointClient};

    pub(super) fn root_context() -> Context {
        let store = Arc::new(OperationStore::new());
        let client: Arc<dyn CheckpointClient> = Arc::new(InMemoryCheckpointClient::new());
        let completions = Arc::new(CompletionRegistry::new());
        let batcher = Arc::new(CheckpointBatcher::new(
            client,
            "arn".to_string(),
            "0".to_string(),
            store.clone(),
            completions.clone(),
            750 * 1024,
            500,
            std::time::Duration::from_millis(100),
        ));
        Context::root(store, batcher, completions, Arc::new(ActivityTracker::new()), Arc::new(ExecutorConfig::new()))
    }

    #[test]
    fn root_ids_are_decimal_and_ascending() {
        let ctx = root_context();
        assert_eq!(ctx.mint_id(), "1");
        assert_eq!(ctx.mint_id(), "2");
        assert_eq!(ctx.mint_id(), "3");
    }

    #[test]
    fn child_ids_are_prefixed_by_parent_id() {
        let ctx = root_context();
        let child_id = ctx.mint_id();
        let child = ctx.child(child_id.clone());
        assert_eq!(child_id, "1");
        assert_eq!(child.mint_id(), "1-1");
        assert_eq!(child.mint_id(), "1-2");
    }

    #[test]
    fn nested_child_ids_chain() {
        let ctx = root_context();
        let child = ctx.child("1".to_string());
        let grandchild_id = child.mint_id();
        let grandchild = child.child(grandchild_id.clone());
        assert_eq!(grandchild_id, "1-1");
        assert_eq!(grandchild.mint_id(), "1-1-1");
    }

    #[test]
    fn fresh_root_with_empty_store_is_not_replaying() {
        let ctx = root_context();
        assert!(!ctx.is_replaying());
    }

    #[test]
    fn root_with_prior_operations_starts_in_replay_and_leaves_on_first_gap() {
        let store = Arc::new(OperationStore::new());
        let mut op = Operation::new("1".to_string(), durable_checkpoint::OperationKind::Step);
        op.status = durable_checkpoint::OperationStatus::Succeeded;
        store.merge(op);
        let client: Arc<dyn CheckpointClient> = Arc::new(InMemoryCheckpointClient::new());
        let completions = Arc::new(CompletionRegistry::new());
        let batcher = Arc::new(CheckpointBatcher::new(
            client,
            "arn".to_string(),
            "0".to_string(),
            store.clone(),
            completions.clone(),
            750 * 1024,
            500,
            std::time::Duration::from_millis(100),
        ));
        let ctx = Context::root(store, batcher, completions, Arc::new(ActivityTracker::new()), Arc::new(ExecutorConfig::new()));
        assert!(ctx.is_replaying());
        ctx.lookup_and_maybe_leave_replay("1");
        assert!(ctx.is_replaying());
        ctx.lookup_and_maybe_leave_replay("2");
        assert!(!ctx.is_replaying());
    }
}
