//! Shared tracing/logging initialization.
//!
//! Both rcp-agent and rcp-listen set up `tracing_subscriber` the same way:
//! an env-filter plus either human-readable or JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"rcp_agent=info,rcp_tunnel=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive for a binary at the given level.
///
/// The tunnel library logs under its own target, so it is included next to
/// the binary's crate name.
pub fn default_filter(binary_crate: &str, level: &str) -> String {
    format!("{binary_crate}={level},rcp_tunnel={level},rcp_certs={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_library_targets() {
        let filter = default_filter("rcp_agent", "debug");
        assert_eq!(filter, "rcp_agent=debug,rcp_tunnel=debug,rcp_certs=debug");
    }
}
