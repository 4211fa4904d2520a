// Path: crates/telemetry/src/init.rs
use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Fallback filter of the node binary.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global `tracing` subscriber: JSON lines on stderr with
/// RFC 3339 UTC timestamps and the event target.
///
/// `RUST_LOG` wins over `default_filter`. Records emitted through the `log`
/// facade are bridged into `tracing`.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter '{}'", default_filter))?,
    };
    let fmt_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_current_span(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing_log::LogTracer::init().context("log bridge already installed")?;
    tracing::subscriber::set_global_default(subscriber)
        .context("global tracing subscriber already installed")?;
    Ok(())
}
