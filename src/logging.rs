//! Structured logging setup.
//!
//! Grounded on the teacher's `tracing_v4::init`: a single `tracing_subscriber` fmt layer
//! filtered by an `EnvFilter` seeded from config, overridable at runtime with `RUST_LOG`.
//! Idempotent, so it's safe to call more than once (e.g. from tests).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber. `config.level` seeds the default filter; `RUST_LOG`
/// takes precedence when set. Returns `Ok(())` even if a subscriber was already installed
/// (expected when called from multiple tests in the same process).
pub fn init_tracing(config: &LoggingConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let fmt_layer = fmt::layer().with_target(true).with_level(true);

    let result = tracing_subscriber::registry().with(fmt_layer).with(env_filter).try_init();

    result.or_else(|e| {
        if e.to_string().contains("a global default trace dispatcher has already been set") {
            Ok(())
        } else {
            Err(format!("failed to initialize tracing: {e}"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig { level: "debug".to_string() };
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }
}
