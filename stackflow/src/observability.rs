//! Logging setup and span helpers.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns false if a
/// subscriber was already installed, which is not an error.
pub fn init_logging(default_filter: &str, json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Creates the span wrapping all work done for one stack.
#[must_use]
pub fn stack_span(stack: &str) -> Span {
    tracing::info_span!("stack", stack = %stack)
}
