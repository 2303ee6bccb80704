/// Initialize structured logging with tracing.
/// This should be called once at application startup.
pub fn init_logging() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    // set_global_default fails when called twice; tests initialize repeatedly.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
