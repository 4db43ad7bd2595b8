//! This file defines the marker-graph binary entry point.

use marker_graph::app;
use marker_graph::cli;
use marker_graph::error;
use marker_graph::tracing;

/// Application entry point
fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(err) = app::run(&args) {
        error::log_error(&err);
        std::process::exit(1);
    }
}
