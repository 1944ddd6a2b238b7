use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a `tracing-subscriber` registry with an `EnvFilter` (`RUST_LOG`,
/// defaulting to `info`) and formatted output. pgebus is a library embedded in
/// someone else's binary, so it stops at structured logging and leaves any
/// OpenTelemetry/OTLP export wiring to the host application.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
