//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; binaries and tests decide where
//! they go. `RUST_LOG` always overrides the default directive.

use tracing_subscriber::EnvFilter;

/// Error returned when a global subscriber is already installed.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a global fmt subscriber filtered by `RUST_LOG` or `default_directive`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<(), InitError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(true)
        .try_init()
}

/// Like [`init_tracing`] but silently keeps an existing subscriber, so
/// callers that may run more than once per process (test binaries, embedded
/// services) can call it unconditionally.
pub fn try_init_tracing(default_directive: &str) {
    if init_tracing(default_directive).is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_repeatable() {
        try_init_tracing("trueno_track=debug");
        assert!(tracing::dispatcher::has_been_set());
        try_init_tracing("trueno_track=debug");
        assert!(init_tracing("info").is_err());
    }
}
