// Path: crates/telemetry/src/sinks.rs
//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns a static reference to the configured cache metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn cache_metrics() -> &'static dyn CacheMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured accumulator metrics sink.
pub fn mmr_metrics() -> &'static dyn MmrMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured POI metrics sink.
pub fn poi_metrics() -> &'static dyn PoiMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured error metrics sink.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// A sink for metrics related to the write-back store cache.
pub trait CacheMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of physical flush transactions committed.
    fn inc_flushes(&self);
    /// Adds to the counter of records persisted by flushes.
    fn inc_records_flushed(&self, count: u64);
    /// Observes the duration of one physical flush, commit included.
    fn observe_flush_duration(&self, duration_secs: f64);
    /// Sets the gauge of records waiting to be flushed.
    fn set_flushable_records(&self, count: u64);
    /// Increments the counter of ingestion calls that had to wait for a flush.
    fn inc_backpressure_waits(&self);
}
impl CacheMetricsSink for NopSink {
    fn inc_flushes(&self) {}
    fn inc_records_flushed(&self, _count: u64) {}
    fn observe_flush_duration(&self, _duration_secs: f64) {}
    fn set_flushable_records(&self, _count: u64) {}
    fn inc_backpressure_waits(&self) {}
}

/// A sink for metrics related to the Merkle Mountain Range accumulator.
pub trait MmrMetricsSink: Send + Sync + std::fmt::Debug {
    /// Adds to the counter of appended leaves.
    fn inc_leaves_appended(&self, count: u64);
    /// Sets the gauge of the accumulator's leaf length.
    fn set_leaf_length(&self, length: u64);
}
impl MmrMetricsSink for NopSink {
    fn inc_leaves_appended(&self, _count: u64) {}
    fn set_leaf_length(&self, _length: u64) {}
}

/// A sink for metrics related to the Proof-of-Index hash chain.
pub trait PoiMetricsSink: Send + Sync + std::fmt::Debug {
    /// Sets the gauge of the highest synced POI height.
    fn set_latest_synced_height(&self, height: u64);
    /// Adds to the counter of gap-filling default rows synthesized.
    fn inc_default_records(&self, count: u64);
}
impl PoiMetricsSink for NopSink {
    fn set_latest_synced_height(&self, _height: u64) {}
    fn inc_default_records(&self, _count: u64) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and variant.
    fn inc_error(&self, kind: &'static str, variant: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _variant: &'static str) {}
}

/// A unified sink that implements all domain-specific traits.
pub trait MetricsSink: CacheMetricsSink + MmrMetricsSink + PoiMetricsSink + ErrorMetricsSink {}

// Blanket implementation to allow any type that implements all sub-traits
// to be used as a `MetricsSink`.
impl<T> MetricsSink for T where T: CacheMetricsSink + MmrMetricsSink + PoiMetricsSink + ErrorMetricsSink
{}

/// Values captured by a [`RecordingSink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recorded {
    /// Physical flushes.
    pub flushes: u64,
    /// Records flushed.
    pub records_flushed: u64,
    /// Number of observed flush durations.
    pub flush_durations: u64,
    /// Last flushable-records gauge value.
    pub flushable_records: u64,
    /// Backpressure waits.
    pub backpressure_waits: u64,
    /// Leaves appended.
    pub leaves_appended: u64,
    /// Last leaf-length gauge value.
    pub leaf_length: u64,
    /// Last synced-height gauge value.
    pub latest_synced_height: u64,
    /// Default rows synthesized.
    pub default_records: u64,
    /// `(kind, variant)` of every counted error.
    pub errors: Vec<(&'static str, &'static str)>,
}

/// An in-memory sink for tests and local debugging.
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

impl RecordingSink {
    /// Copies out everything recorded so far.
    pub fn snapshot(&self) -> Recorded {
        self.inner.lock().clone()
    }
}

impl CacheMetricsSink for RecordingSink {
    fn inc_flushes(&self) {
        self.inner.lock().flushes += 1;
    }
    fn inc_records_flushed(&self, count: u64) {
        self.inner.lock().records_flushed += count;
    }
    fn observe_flush_duration(&self, _duration_secs: f64) {
        self.inner.lock().flush_durations += 1;
    }
    fn set_flushable_records(&self, count: u64) {
        self.inner.lock().flushable_records = count;
    }
    fn inc_backpressure_waits(&self) {
        self.inner.lock().backpressure_waits += 1;
    }
}

impl MmrMetricsSink for RecordingSink {
    fn inc_leaves_appended(&self, count: u64) {
        self.inner.lock().leaves_appended += count;
    }
    fn set_leaf_length(&self, length: u64) {
        self.inner.lock().leaf_length = length;
    }
}

impl PoiMetricsSink for RecordingSink {
    fn set_latest_synced_height(&self, height: u64) {
        self.inner.lock().latest_synced_height = height;
    }
    fn inc_default_records(&self, count: u64) {
        self.inner.lock().default_records += count;
    }
}

impl ErrorMetricsSink for RecordingSink {
    fn inc_error(&self, kind: &'static str, variant: &'static str) {
        self.inner.lock().errors.push((kind, variant));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_global_falls_back_to_nop() {
        // No test in this crate installs a global sink.
        cache_metrics().inc_flushes();
        error_metrics().inc_error("cache", "OutOfOrder");
    }

    #[test]
    fn recording_sink_accumulates() {
        let sink = RecordingSink::default();
        sink.inc_records_flushed(3);
        sink.inc_records_flushed(2);
        sink.set_leaf_length(9);
        sink.inc_error("poi", "NonMonotonic");
        let rec = sink.snapshot();
        assert_eq!(rec.records_flushed, 5);
        assert_eq!(rec.leaf_length, 9);
        assert_eq!(rec.errors, vec![("poi", "NonMonotonic")]);
    }
}
