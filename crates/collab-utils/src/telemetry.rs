use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Initialize the process-wide tracing subscriber.
///
/// Honors `RUST_LOG` for filtering; falls back to `info` for `service_name`
/// and `warn` for everything else when unset.
pub fn setup_telemetry(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{service_name}=info,warn")));

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true));

    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");
}
