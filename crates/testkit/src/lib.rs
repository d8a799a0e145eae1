#![warn(missing_docs)]
//! Test surfaces: bootstrap fixtures, a scripted echo server and tracing setup.

mod fixtures;
mod server;

pub use fixtures::*;
pub use server::*;

/// Install a test-friendly subscriber honouring `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
