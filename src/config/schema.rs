//! Configuration schema for Cardkeep
//!
//! Configuration is stored at `~/.config/cardkeep/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Filesystem locations
    pub paths: PathsConfig,

    /// Retry/backoff settings
    pub retry: RetryConfig,

    /// Circuit breaker settings
    pub circuit: CircuitConfig,

    /// Response cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append per-source outcomes to the run log
    pub run_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            run_log: true,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for circuit, cache and hash records (platform state dir if unset)
    pub state_dir: Option<PathBuf>,

    /// Only generators under this directory may be executed
    pub generators_dir: PathBuf,

    /// Interpreters a generator may be run with, matched by exact name
    pub interpreters: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            generators_dir: PathBuf::from("scripts"),
            interpreters: vec!["python3".to_string(), "python".to_string(), "sh".to_string()],
        }
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Growth factor applied per retry
    pub multiplier: f64,

    /// Upper bound on a single delay in milliseconds
    pub max_delay_ms: u64,

    /// Randomize each delay between zero and its computed value
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long an open circuit stays open after the last failure
    pub open_timeout_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout_secs: 3600,
        }
    }
}

impl CircuitConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this many days are treated as absent
    pub ttl_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_days: 7 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days * 24 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.cache.ttl(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.paths.generators_dir, PathBuf::from("scripts"));
        assert!(config.paths.interpreters.iter().any(|i| i == "python3"));
    }

    #[test]
    fn interpreters_can_be_narrowed() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            interpreters = ["python3"]
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.interpreters, vec!["python3"]);
        assert_eq!(config.paths.generators_dir, PathBuf::from("scripts"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [circuit]
            failure_threshold = 2
            open_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit.failure_threshold, 2);
        assert_eq!(config.circuit.open_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry.initial_delay(), Duration::from_millis(1000));
        assert_eq!(config.general.log_format, "text");
    }
}
