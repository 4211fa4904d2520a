// Path: crates/telemetry/src/time.rs
use crate::sinks::CacheMetricsSink;
use std::time::Instant;

/// Reports the lifetime of a physical cache flush to a [`CacheMetricsSink`] on drop.
pub struct FlushTimer<'a> {
    sink: &'a dyn CacheMetricsSink,
    start: Instant,
}

impl<'a> FlushTimer<'a> {
    /// Starts timing.
    pub fn new(sink: &'a dyn CacheMetricsSink) -> Self {
        Self {
            sink,
            start: Instant::now(),
        }
    }
}

impl Drop for FlushTimer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_flush_duration(self.start.elapsed().as_secs_f64());
    }
}
