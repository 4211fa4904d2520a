// Path: crates/cache/src/chain.rs
//! The per-id history of a versioned entity.

use strata_types::{Height, HistoricalValue};

/// Rejected write: the chain already holds a value at or past `current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfOrder {
    /// The highest height already recorded.
    pub current: Height,
    /// The rejected height.
    pub attempted: Height,
}

/// Values of one entity id ordered by start height.
///
/// Intervals never overlap and at most the last value is open. The chain only
/// grows forward: writes below the last recorded height are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionChain<T> {
    values: Vec<HistoricalValue<T>>,
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T: Clone> VersionChain<T> {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `data` from `height` on.
    ///
    /// A write at the height of the last value replaces it in place. A write
    /// above it closes the open value and starts a new one.
    pub fn set(&mut self, data: T, height: Height, operation_index: u64) -> Result<(), OutOfOrder> {
        if let Some(last) = self.values.last_mut() {
            let current = last.end_height.unwrap_or(last.start_height).max(last.start_height);
            if last.start_height > height || current > height {
                return Err(OutOfOrder {
                    current,
                    attempted: height,
                });
            }
            if last.start_height == height {
                last.data = data;
                last.operation_index = operation_index;
                last.end_height = None;
                last.removed = false;
                return Ok(());
            }
            if last.end_height.is_none() {
                last.end_height = Some(height);
            }
        }
        self.values
            .push(HistoricalValue::open(data, height, operation_index));
        Ok(())
    }

    /// Closes the open value at `height` as a removal.
    ///
    /// A value that started at `height` never became visible and is dropped.
    pub fn remove(&mut self, height: Height, operation_index: u64) -> Result<(), OutOfOrder> {
        let Some(last) = self.values.last_mut() else {
            return Ok(());
        };
        if last.start_height > height {
            return Err(OutOfOrder {
                current: last.start_height,
                attempted: height,
            });
        }
        if !last.is_open() {
            return Ok(());
        }
        if last.start_height == height {
            self.values.pop();
        } else {
            last.end_height = Some(height);
            last.removed = true;
            last.operation_index = operation_index;
        }
        Ok(())
    }

    /// The most recent value, open or closed.
    pub fn latest(&self) -> Option<&HistoricalValue<T>> {
        self.values.last()
    }

    /// The open value, if the id currently exists in this chain.
    pub fn open_value(&self) -> Option<&HistoricalValue<T>> {
        self.values.last().filter(|v| v.is_open())
    }

    /// The value whose interval covers `height`.
    pub fn value_at(&self, height: Height) -> Option<&HistoricalValue<T>> {
        self.values.iter().find(|v| v.covers(height))
    }

    /// The earliest start height in the chain.
    pub fn first_start(&self) -> Option<Height> {
        self.values.first().map(|v| v.start_height)
    }

    /// Every value, ordered by start height.
    pub fn values(&self) -> &[HistoricalValue<T>] {
        &self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the chain holds no value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The part of the chain visible at or below `height`.
    ///
    /// Values starting above `height` are dropped and intervals ending above it
    /// are reopened, so the result is what the chain looked like once block
    /// `height` was fully processed.
    pub fn from_below_height(&self, height: Height) -> Self {
        let values = self
            .values
            .iter()
            .filter(|v| v.start_height <= height)
            .cloned()
            .map(|mut v| {
                if v.end_height.map_or(false, |end| end > height) {
                    v.end_height = None;
                    v.removed = false;
                }
                v
            })
            .collect();
        Self { values }
    }

    /// The values starting above `height`.
    pub fn from_above_height(&self, height: Height) -> Self {
        let values = self
            .values
            .iter()
            .filter(|v| v.start_height > height)
            .cloned()
            .collect();
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_height_writes_collapse() {
        let mut c = VersionChain::new();
        c.set("d1", 5, 0).unwrap();
        c.set("d2", 5, 1).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.open_value().map(|v| v.data), Some("d2"));
        assert_eq!(c.open_value().map(|v| v.operation_index), Some(1));
    }

    #[test]
    fn lower_height_is_rejected() {
        let mut c = VersionChain::new();
        c.set("a", 5, 0).unwrap();
        assert_eq!(
            c.set("b", 4, 1),
            Err(OutOfOrder {
                current: 5,
                attempted: 4
            })
        );
        c.remove(8, 2).unwrap();
        assert!(c.set("c", 7, 3).is_err());
        assert!(c.remove(3, 4).is_err());
    }

    #[test]
    fn remove_then_set_leaves_a_gap() {
        let mut c = VersionChain::new();
        c.set("a", 1, 0).unwrap();
        c.remove(4, 1).unwrap();
        c.set("b", 6, 2).unwrap();
        let v = c.values();
        assert_eq!((v[0].start_height, v[0].end_height, v[0].removed), (1, Some(4), true));
        assert_eq!((v[1].start_height, v[1].end_height), (6, None));
        assert!(c.value_at(5).is_none());
        assert_eq!(c.value_at(3).map(|v| v.data), Some("a"));
    }

    #[test]
    fn remove_in_the_creating_block_drops_the_value() {
        let mut c = VersionChain::new();
        c.set("a", 1, 0).unwrap();
        c.set("b", 3, 1).unwrap();
        c.remove(3, 2).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.latest().map(|v| v.end_height), Some(Some(3)));
    }

    #[test]
    fn cuts_split_the_chain() {
        let mut c = VersionChain::new();
        c.set("a", 1, 0).unwrap();
        c.set("b", 5, 1).unwrap();
        c.set("c", 9, 2).unwrap();

        let below = c.from_below_height(5);
        assert_eq!(below.len(), 2);
        assert!(below.open_value().map(|v| v.data == "b").unwrap_or(false));

        let above = c.from_above_height(5);
        assert_eq!(above.first_start(), Some(9));
        assert_eq!(above.len(), 1);
    }

    proptest! {
        #[test]
        fn intervals_never_overlap(ops in proptest::collection::vec((0u64..50, any::<bool>()), 1..60)) {
            let mut c = VersionChain::new();
            for (i, (height, is_remove)) in ops.into_iter().enumerate() {
                let _ = if is_remove {
                    c.remove(height, i as u64)
                } else {
                    c.set(i, height, i as u64)
                };
            }
            let values = c.values();
            let open = values.iter().filter(|v| v.is_open()).count();
            prop_assert!(open <= 1);
            for w in values.windows(2) {
                let end = w[0].end_height;
                prop_assert!(end.is_some());
                prop_assert!(end.unwrap_or(0) <= w[1].start_height);
                prop_assert!(w[0].start_height < w[1].start_height);
            }
            for v in values {
                prop_assert!(v.end_height.map_or(true, |e| e >= v.start_height));
            }
        }
    }
}
