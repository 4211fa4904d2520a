// Path: crates/api/src/storage/transaction.rs

//! A buffered write transaction with after-commit hooks.

use super::{DurableStore, StorageError, StoreOp};
use parking_lot::Mutex;

/// A callback run once the transaction's operations are durable.
///
/// Hooks are dropped without running if the commit fails, so anything they
/// capture (e.g. a flush lock guard) is released either way.
pub type CommitHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct TxState {
    ops: Vec<(Option<u64>, StoreOp)>,
    hooks: Vec<CommitHook>,
}

/// Collects [`StoreOp`]s from several caches and applies them as one atomic batch.
///
/// Caches push into the transaction concurrently through a shared reference;
/// the orchestrator owns it and calls [`Transaction::commit`] once.
#[derive(Default)]
pub struct Transaction {
    state: Mutex<TxState>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("ops", &state.ops.len())
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

impl Transaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an operation with no ordering constraint.
    pub fn push(&self, op: StoreOp) {
        self.state.lock().ops.push((None, op));
    }

    /// Queues an operation that must be replayed in `operation_index` order
    /// relative to every other sequenced operation.
    pub fn push_sequenced(&self, operation_index: u64, op: StoreOp) {
        self.state.lock().ops.push((Some(operation_index), op));
    }

    /// Registers a hook that runs after a successful commit.
    pub fn after_commit<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.lock().hooks.push(Box::new(hook));
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.state.lock().ops.len()
    }

    /// Returns true if no operation has been queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().ops.is_empty()
    }

    fn into_parts(self) -> (Vec<StoreOp>, Vec<CommitHook>) {
        let state = self.state.into_inner();
        let (mut sequenced, unsequenced): (Vec<_>, Vec<_>) =
            state.ops.into_iter().partition(|(idx, _)| idx.is_some());
        // Stable, so same-index ops keep their push order.
        sequenced.sort_by_key(|(idx, _)| *idx);
        let ops = sequenced
            .into_iter()
            .chain(unsequenced)
            .map(|(_, op)| op)
            .collect();
        (ops, state.hooks)
    }

    /// Returns the queued operations in apply order, discarding hooks.
    pub fn into_ops(self) -> Vec<StoreOp> {
        self.into_parts().0
    }

    /// Applies every queued operation atomically, then runs the commit hooks.
    ///
    /// An empty transaction does not touch the store. On failure nothing is
    /// applied and no hook runs.
    pub async fn commit(self, store: &dyn DurableStore) -> Result<(), StorageError> {
        let (ops, hooks) = self.into_parts();
        if !ops.is_empty() {
            store.apply(ops).await?;
        }
        for hook in hooks {
            hook();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(key: &str) -> StoreOp {
        StoreOp::SetMetadata {
            key: key.to_string(),
            value: json!(1),
        }
    }

    #[test]
    fn sequenced_ops_are_sorted_and_come_first() {
        let tx = Transaction::new();
        tx.push(set("plain"));
        tx.push_sequenced(7, set("seven"));
        tx.push_sequenced(3, set("three"));
        tx.push_sequenced(7, set("seven-b"));
        let keys: Vec<String> = tx
            .into_ops()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::SetMetadata { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["three", "seven", "seven-b", "plain"]);
    }

    #[test]
    fn dropping_a_transaction_drops_its_hooks() {
        let marker = std::sync::Arc::new(());
        let tx = Transaction::new();
        let held = marker.clone();
        tx.after_commit(move || drop(held));
        assert_eq!(std::sync::Arc::strong_count(&marker), 2);
        drop(tx);
        assert_eq!(std::sync::Arc::strong_count(&marker), 1);
    }
}
