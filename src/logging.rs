//! Subscriber setup for both binaries. Output goes to stderr so the client's
//! table or JSON output on stdout stays clean.

use tracing_subscriber::EnvFilter;

pub const SERVER_DEFAULT_FILTER: &str = "taskwire=info";
pub const CLIENT_DEFAULT_FILTER: &str = "taskwire=warn";

/// `RUST_LOG` wins when set and valid.
pub fn init(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}
