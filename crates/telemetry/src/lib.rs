// Path: crates/telemetry/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Strata Telemetry
//!
//! Structured logging initialization and abstract metrics sinks that keep the
//! cache, accumulator and POI code independent of any metrics backend.

/// The initialization routine for global structured logging.
pub mod init;
/// Abstract traits (`*MetricsSink`) that define the contract for metrics reporting.
pub mod sinks;
/// A simple RAII timer for measuring the duration of a flush.
pub mod time;

pub use sinks::{cache_metrics, error_metrics, mmr_metrics, poi_metrics};
