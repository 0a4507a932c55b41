//! Configuration loading for the signal node.
//!
//! Configuration is loaded from:
//! 1. A base TOML file (`config/node.toml` by default, overridable via `SIGNAL_NODE_CONFIG`).
//! 2. Environment variables prefixed with `SIGNAL_NODE_`, split on `_` (e.g.
//!    `SIGNAL_NODE_CAM_DB_HOST=10.0.0.5` overrides `cam_db.host`).
//!
//! # Example
//! ```no_run
//! use signal_node::config::NodeConfig;
//!
//! let config = NodeConfig::load()?;
//! println!("operation mode: {}", config.operation_mode);
//! # Ok::<(), signal_node::error::NodeError>(())
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

const DEFAULT_CONFIG_PATH: &str = "config/node.toml";
const CONFIG_PATH_ENV_VAR: &str = "SIGNAL_NODE_CONFIG";
const ENV_PREFIX: &str = "SIGNAL_NODE_";

/// Top-level configuration for the signal node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `"manual"` or `"remote"`; selects which [`crate::datasource::DataSource`] is built.
    #[serde(default = "default_operation_mode")]
    pub operation_mode: String,
    /// This node's own camera IP address, used as the `edge_sys_2k_ip` lookup key against
    /// `cam_db` in remote mode. Ignored by the manual data source.
    #[serde(default)]
    pub camera_ip: String,
    /// Camera-id database connection.
    pub cam_db: DbConfig,
    /// Signal-plan database connection.
    pub signal_db: DbConfig,
    /// Vehicle-sample ingestion feature flags.
    #[serde(default)]
    pub vehicle: VehicleConfig,
    /// Special Site direction-override behavior.
    #[serde(default)]
    pub special_site: SpecialSiteConfig,
    /// Logging behavior.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and resilience settings shared by `cam_db` and `signal_db`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Whether this backend is used at all (`signal_db` may be turned off entirely, running
    /// the node with no signal inference even in `remote` mode).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hostname or IP of the remote database.
    pub host: String,
    /// TCP port of the remote database's query endpoint.
    pub port: u16,
    /// Synchronous-style retry policy used for one-shot queries.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Background reconnect-with-backoff policy used while disconnected.
    #[serde(default)]
    pub background_reconnect: BackgroundReconnectConfig,
}

/// Fixed-delay retry policy for a single query attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Exponential backoff policy for the background reconnect task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundReconnectConfig {
    /// Whether the background reconnect task runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound the backoff delay saturates at, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// How often the task checks for a cancellation signal, in seconds.
    #[serde(default = "default_check_interval_sec")]
    pub check_interval_sec: u64,
    /// Fraction of random jitter applied to each computed delay (`0.0..=1.0`).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackgroundReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            check_interval_sec: default_check_interval_sec(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Vehicle-sample ingestion feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    /// Whether the 2k-resolution vehicle-sample stream is consumed.
    #[serde(default = "default_true")]
    pub two_k_enabled: bool,
    /// Whether the 4k-resolution vehicle-sample stream is consumed.
    #[serde(default)]
    pub four_k_enabled: bool,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            two_k_enabled: default_true(),
            four_k_enabled: false,
        }
    }
}

/// Special Site direction-override configuration.
///
/// Exactly one of `straight_left`/`right` must be `true` when `enabled` is `true`; see
/// [`NodeConfig::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialSiteConfig {
    /// Whether Special Site overriding is active at all.
    #[serde(default)]
    pub enabled: bool,
    /// Override a straight-vs-left ambiguity using the signal phase.
    #[serde(default)]
    pub straight_left: bool,
    /// Override toward a right-turn direction.
    #[serde(default)]
    pub right: bool,
}

/// Structured-logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level (`"trace"`, `"debug"`, `"info"`, `"warn"`, `"error"`), overridable
    /// at runtime with the `RUST_LOG` environment variable.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_operation_mode() -> String {
    "manual".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_check_interval_sec() -> u64 {
    1
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load configuration from the default path (or `SIGNAL_NODE_CONFIG` if set) plus the
    /// `SIGNAL_NODE_` environment overlay, then validate it.
    pub fn load() -> NodeResult<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Load configuration from an explicit file path plus the environment overlay.
    pub fn load_from<P: AsRef<Path>>(path: P) -> NodeResult<Self> {
        let config: NodeConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde's per-field defaults cannot express.
    pub fn validate(&self) -> NodeResult<()> {
        let valid_modes = ["manual", "remote"];
        if !valid_modes.contains(&self.operation_mode.as_str()) {
            return Err(NodeError::Configuration(format!(
                "invalid operation_mode '{}', must be one of: {}",
                self.operation_mode,
                valid_modes.join(", ")
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(NodeError::Configuration(format!(
                "invalid logging.level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        for (name, db) in [("cam_db", &self.cam_db), ("signal_db", &self.signal_db)] {
            if db.retry.max_attempts == 0 {
                return Err(NodeError::Configuration(format!(
                    "{name}.retry.max_attempts must be at least 1"
                )));
            }
            if !(0.0..=1.0).contains(&db.background_reconnect.jitter_factor) {
                return Err(NodeError::Configuration(format!(
                    "{name}.background_reconnect.jitter_factor must be within 0.0..=1.0"
                )));
            }
            if db.background_reconnect.max_delay_ms < db.background_reconnect.initial_delay_ms {
                return Err(NodeError::Configuration(format!(
                    "{name}.background_reconnect.max_delay_ms must be >= initial_delay_ms"
                )));
            }
        }

        if self.special_site.enabled && self.special_site.straight_left == self.special_site.right {
            return Err(NodeError::Configuration(
                "special_site.enabled requires exactly one of straight_left/right to be true".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    const MINIMAL: &str = r#"
        operation_mode = "remote"

        [cam_db]
        host = "127.0.0.1"
        port = 21212

        [signal_db]
        host = "127.0.0.1"
        port = 21213
    "#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(MINIMAL);
        let config = NodeConfig::load_from(file.path()).expect("load config");

        assert_eq!(config.operation_mode, "remote");
        assert_eq!(config.cam_db.retry.max_attempts, 3);
        assert!(config.cam_db.background_reconnect.enabled);
        assert!(!config.special_site.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_unknown_operation_mode() {
        let file = write_config(
            r#"
            operation_mode = "bogus"

            [cam_db]
            host = "h"
            port = 1

            [signal_db]
            host = "h"
            port = 1
        "#,
        );
        let err = NodeConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("operation_mode"));
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let file = write_config(
            r#"
            operation_mode = "manual"

            [cam_db]
            host = "h"
            port = 1
            [cam_db.retry]
            max_attempts = 0

            [signal_db]
            host = "h"
            port = 1
        "#,
        );
        let err = NodeConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn env_overlay_overrides_toml() {
        let file = write_config(MINIMAL);
        std::env::set_var("SIGNAL_NODE_CAM_DB_HOST", "10.0.0.9");
        let config = NodeConfig::load_from(file.path()).expect("load config");
        std::env::remove_var("SIGNAL_NODE_CAM_DB_HOST");

        assert_eq!(config.cam_db.host, "10.0.0.9");
    }
}
