//! In-memory operation store.
//!
//! `OperationStore` is the execution's local view of its operation log. It is populated
//! from the backend (initial page fetch, then every checkpoint response) and consulted by
//! every durable operation's `execute()`/`get()` to decide whether to replay or execute.
//!
//! # Merge semantics
//!
//! `OperationStore` never downgrades a terminal operation to a non-terminal status: once
//! `merge()` has recorded a `Succeeded`/`Failed`/`Cancelled`/`TimedOut`/`Stopped` operation,
//! a later call carrying the same id with a non-terminal status for it is ignored for that
//! id. This protects replay determinism against a stale or reordered backend response.

use crate::operation::{Operation, OperationStatus};
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe map of operation id to its latest known record.
///
/// Reads take a shared lock and return an owned clone (`Operation` is cheap to clone and
/// the store's lifetime is a single execution, so cloning avoids holding a lock across
/// user code).
#[derive(Debug, Default)]
pub struct OperationStore {
    operations: RwLock<HashMap<String, Operation>>,
}

impl OperationStore {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store pre-populated from a backend page fetch (used at execution entry).
    pub fn from_operations(operations: Vec<Operation>) -> Self {
        let store = Self::new();
        for op in operations {
            store.merge(op);
        }
        store
    }

    /// Look up an operation's current record by id.
    pub fn get(&self, id: &str) -> Option<Operation> {
        self.operations.read().unwrap().get(id).cloned()
    }

    /// True if any operation exists whose `parent_id` equals `parent_id` — used to seed a
    /// child `Context`'s initial replay flag.
    pub fn has_children_of(&self, parent_id: &str) -> bool {
        self.operations
            .read()
            .unwrap()
            .values()
            .any(|op| op.parent_id.as_deref() == Some(parent_id))
    }

    /// True if any non-`Execution` operation exists at all — used to seed the root
    /// `Context`'s initial replay flag.
    pub fn has_any_non_execution_operation(&self) -> bool {
        self.operations
            .read()
            .unwrap()
            .values()
            .any(|op| !matches!(op.kind, crate::operation::OperationKind::Execution))
    }

    /// Merge a single operation record from a backend response into the store.
    ///
    /// Never overwrites a locally terminal status with a non-terminal one. Returns the
    /// record that ends up stored (which may be the pre-existing terminal one, unchanged).
    pub fn merge(&self, incoming: Operation) -> Operation {
        let mut operations = self.operations.write().unwrap();
        match operations.get(&incoming.id) {
            Some(existing) if existing.status.is_terminal() && !incoming.status.is_terminal() => {
                existing.clone()
            }
            _ => {
                operations.insert(incoming.id.clone(), incoming.clone());
                incoming
            }
        }
    }

    /// Merge a batch of operations, e.g. the `new_operations` of a checkpoint response.
    pub fn merge_all(&self, incoming: impl IntoIterator<Item = Operation>) -> Vec<Operation> {
        incoming.into_iter().map(|op| self.merge(op)).collect()
    }

    /// Insert a brand-new operation the context is about to checkpoint a START for, without
    /// going through the terminal-status guard (there is nothing to protect yet).
    pub fn insert_new(&self, operation: Operation) {
        self.operations
            .write()
            .unwrap()
            .insert(operation.id.clone(), operation);
    }

    pub fn len(&self) -> usize {
        self.operations.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the whole store, for diagnostics and tests.
    pub fn snapshot(&self) -> HashMap<String, Operation> {
        self.operations.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;

    fn step(id: &str, status: OperationStatus) -> Operation {
        let mut op = Operation::new(id.to_string(), OperationKind::Step);
        op.status = status;
        op
    }

    #[test]
    fn merge_accepts_non_terminal_when_absent() {
        let store = OperationStore::new();
        let merged = store.merge(step("1", OperationStatus::Started));
        assert_eq!(merged.status, OperationStatus::Started);
    }

    #[test]
    fn merge_never_downgrades_terminal_status() {
        let store = OperationStore::new();
        store.merge(step("1", OperationStatus::Succeeded));
        let merged = store.merge(step("1", OperationStatus::Started));
        assert_eq!(merged.status, OperationStatus::Succeeded);
        assert_eq!(store.get("1").unwrap().status, OperationStatus::Succeeded);
    }

    #[test]
    fn merge_allows_terminal_to_terminal_overwrite() {
        let store = OperationStore::new();
        store.merge(step("1", OperationStatus::Succeeded));
        // a later response still reporting the same terminal status is a no-op in effect
        let merged = store.merge(step("1", OperationStatus::Succeeded));
        assert_eq!(merged.status, OperationStatus::Succeeded);
    }

    #[test]
    fn has_children_of_reflects_parent_id() {
        let store = OperationStore::new();
        let mut child = step("1-1", OperationStatus::Succeeded);
        child.parent_id = Some("1".to_string());
        store.merge(child);
        assert!(store.has_children_of("1"));
        assert!(!store.has_children_of("2"));
    }

    #[test]
    fn from_operations_seeds_the_store() {
        let store = OperationStore::from_operations(vec![
            step("1", OperationStatus::Succeeded),
            step("2", OperationStatus::Started),
        ]);
        assert_eq!(store.len(), 2);
    }
}
