//! Logging configuration using tracing
//!
//! Provides structured logging to stderr with support for the RUST_LOG
//! environment variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// Sets up structured logging with:
/// - Filtering via RUST_LOG environment variable (defaults to "info" so sync
///   progress is visible without extra flags)
/// - Formatted output to stderr
///
/// # Example RUST_LOG values
/// - `RUST_LOG=warn` - Warnings and errors only
/// - `RUST_LOG=debug` - Show debug and above
/// - `RUST_LOG=jiradw=trace` - Trace level for the jiradw crate
/// - `RUST_LOG=jiradw=debug,rusqlite=info` - Different levels per crate
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init() -> crate::Result<()> {
    // Respect RUST_LOG, defaulting to "info": a sync run should narrate its
    // pages and commits on a terminal without any extra configuration.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| crate::EtlError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_helper() {
        // Should never panic, even called twice
        init_test();
        init_test();
    }

    #[test]
    fn test_logging_macros() {
        init_test();

        tracing::debug!("This is a debug message");
        tracing::info!("This is an info message");

        // Structured logging
        tracing::info!(
            scope = "DEMO:Bug",
            pages = 3,
            "Testing structured logging"
        );
    }
}
