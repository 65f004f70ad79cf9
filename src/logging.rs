//! tracing subscriber setup shared by both binaries.

use tracing_subscriber::EnvFilter;

/// Log to stderr. `RUST_LOG` wins over `default_directives`.
pub fn init(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
