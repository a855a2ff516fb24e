use std::{env, io};

use tracing_subscriber::{prelude::*, EnvFilter};

/// Initializes the process-wide `tracing` subscriber from the `RBS_LOG` environment variable,
/// falling back to `info` when unset. Mirrors the fmt-layer shape used across this workspace's
/// binaries, minus the telemetry exporter pipeline (out of scope for this fabric's core).
pub fn init() {
    let filter = match env::var("RBS_LOG") {
        Ok(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info")),
        Err(_) => EnvFilter::new("info"),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr);

    tracing_subscriber::registry().with(fmt_layer).with(filter).init();
}
