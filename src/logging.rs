//! Tracing subscriber setup for hosts embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! the host's call.

use tracing_subscriber::EnvFilter;

/// Build the filter for a verbosity level.
///
/// `RUST_LOG`, when set, takes precedence over the level.
#[must_use]
pub fn filter_for(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(directive_for(verbosity))
    }
}

fn directive_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug,rusqlite=info,reqwest=info,hyper=info",
        _ => "trace",
    }
}

/// Install a stderr subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbosity))
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_levels() {
        assert_eq!(directive_for(0), "warn");
        assert_eq!(directive_for(1), "info");
        assert!(directive_for(2).starts_with("debug"));
        assert_eq!(directive_for(9), "trace");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(0);
        init_tracing(3);
    }
}
