//! Tracing (logging)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to info logging
/// for this crate if not set. Events are written to stderr so that command output on stdout
/// stays machine readable.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marker_graph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
