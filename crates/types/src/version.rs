// Path: crates/types/src/version.rs

//! Block-height-versioned entity values.

use crate::Height;
use serde::{Deserialize, Serialize};

/// The value of one entity id over the half-open interval `[start_height, end_height)`.
///
/// `end_height == None` means the value is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalValue<T> {
    /// The entity payload.
    pub data: T,
    /// First height at which the value is valid.
    pub start_height: Height,
    /// First height at which the value is no longer valid.
    pub end_height: Option<Height>,
    /// Process-wide write sequence number.
    pub operation_index: u64,
    /// Set when the interval was closed by a removal rather than a newer value.
    pub removed: bool,
}

impl<T> HistoricalValue<T> {
    /// Creates a new open value.
    pub fn open(data: T, start_height: Height, operation_index: u64) -> Self {
        Self {
            data,
            start_height,
            end_height: None,
            operation_index,
            removed: false,
        }
    }

    /// Returns true if the value has no end height.
    pub fn is_open(&self) -> bool {
        self.end_height.is_none()
    }

    /// Returns true if `height` lies in `[start_height, end_height)`.
    pub fn covers(&self, height: Height) -> bool {
        self.start_height <= height && self.end_height.map_or(true, |end| height < end)
    }
}

/// Marks an id as removed at a given block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// The height at which the removal happened.
    pub removed_at_block: Height,
    /// Process-wide write sequence number of the removal.
    pub operation_index: u64,
}
