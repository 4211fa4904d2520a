// Path: crates/cache/src/sequence.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The process-wide write sequence shared by every cache of one orchestrator.
///
/// Indices are strictly increasing and totally order writes across entity
/// types, which is what ordered flushes replay by.
#[derive(Debug, Clone, Default)]
pub struct OperationIndex(Arc<AtomicU64>);

impl OperationIndex {
    /// Creates a sequence starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next index.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_counter() {
        let a = OperationIndex::new();
        let b = a.clone();
        assert_eq!(a.next(), 0);
        assert_eq!(b.next(), 1);
        assert_eq!(a.next(), 2);
    }
}
