// Path: crates/api/src/cache/mod.rs

//! The flush contract shared by every write-back cache.

use crate::storage::{StorageError, Transaction};
use async_trait::async_trait;
use strata_types::Height;

/// A write-back cache that can be flushed into a [`Transaction`].
///
/// Implementations hold their own flush lock from the start of
/// [`Cacheable::flush`] until the transaction's after-commit hook has run
/// [`Cacheable::clear`], so concurrent readers never see a half-flushed state.
#[async_trait]
pub trait Cacheable: Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &str;

    /// Number of writes not yet durably persisted.
    fn flushable_record_count(&self) -> usize;

    /// Returns true if a flush would emit at least one operation.
    fn is_flushable(&self) -> bool {
        self.flushable_record_count() > 0
    }

    /// Queues every write at or below `height` into `tx` and registers an
    /// after-commit hook that prunes them from memory.
    ///
    /// With `ordered`, writes are queued as sequenced operations so that the
    /// transaction replays them in operation index order.
    async fn flush(&self, tx: &Transaction, height: Height, ordered: bool)
        -> Result<(), StorageError>;

    /// Drops cached writes. `None` drops everything, `Some(h)` drops what a
    /// flush at `h` persisted.
    fn clear(&self, height: Option<Height>);

    /// Discards uncommitted writes above `height`.
    async fn rewind(&self, height: Height);
}
