//! Relay configuration loaded from `txrelay.toml`.
//!
//! Missing keys fall back to defaults. `TXRELAY_*` environment variables take
//! precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use txrelay_observability::{LogFormat, LoggingConfig};

use crate::jobs::{BackoffPolicy, BackoffStrategy, RetryPolicy, SubmissionConfig};

pub const DEFAULT_CONFIG_FILE: &str = "txrelay.toml";
const ENV_PREFIX: &str = "TXRELAY_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Attempt budget per job
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_delay_ms")]
    pub backoff_base_delay_ms: u64,

    #[serde(default = "default_backoff_max_delay_ms")]
    pub backoff_max_delay_ms: u64,

    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,

    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Deadline for a single submit call
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Identities that get a ledger connection
    #[serde(default = "default_identities")]
    pub identities: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_delay_ms() -> u64 {
    500
}

fn default_backoff_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_jitter() -> f64 {
    0.1
}

fn default_submit_timeout_ms() -> u64 {
    30_000
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_identities() -> Vec<String> {
    vec!["Org1MSP".to_string(), "Org2MSP".to_string()]
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_delay_ms: default_backoff_base_delay_ms(),
            backoff_max_delay_ms: default_backoff_max_delay_ms(),
            backoff_strategy: BackoffStrategy::default(),
            backoff_jitter: default_backoff_jitter(),
            submit_timeout_ms: default_submit_timeout_ms(),
            worker_concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            identities: default_identities(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load from `path`, or from `txrelay.toml` in the working directory if it
    /// exists, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `TXRELAY_*` overrides from `(name, value)` pairs.
    ///
    /// Unknown `TXRELAY_*` names are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();

            match key {
                "MAX_ATTEMPTS" => self.max_attempts = parse(&name, value)?,
                "BACKOFF_BASE_DELAY_MS" => self.backoff_base_delay_ms = parse(&name, value)?,
                "BACKOFF_MAX_DELAY_MS" => self.backoff_max_delay_ms = parse(&name, value)?,
                "BACKOFF_JITTER" => self.backoff_jitter = parse(&name, value)?,
                "SUBMIT_TIMEOUT_MS" => self.submit_timeout_ms = parse(&name, value)?,
                "WORKER_CONCURRENCY" => self.worker_concurrency = parse(&name, value)?,
                "POLL_INTERVAL_MS" => self.poll_interval_ms = parse(&name, value)?,
                "BACKOFF_STRATEGY" => {
                    self.backoff_strategy = match value.to_ascii_lowercase().as_str() {
                        "fixed" => BackoffStrategy::Fixed,
                        "linear" => BackoffStrategy::Linear,
                        "exponential" => BackoffStrategy::Exponential,
                        other => {
                            return Err(ConfigError::Invalid(format!(
                                "{name}: unknown backoff strategy {other:?}"
                            )));
                        }
                    }
                }
                "IDENTITIES" => {
                    self.identities = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "LOG_FILTER" => self.logging.filter = value.to_string(),
                "LOG_FORMAT" => {
                    self.logging.format = match value.to_ascii_lowercase().as_str() {
                        "json" => LogFormat::Json,
                        "text" => LogFormat::Text,
                        other => {
                            return Err(ConfigError::Invalid(format!(
                                "{name}: unknown log format {other:?}"
                            )));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("worker_concurrency must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff_jitter must be within [0, 1], got {}",
                self.backoff_jitter
            )));
        }
        if self.backoff_base_delay_ms > self.backoff_max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_base_delay_ms ({}) exceeds backoff_max_delay_ms ({})",
                self.backoff_base_delay_ms, self.backoff_max_delay_ms
            )));
        }
        if self.identities.is_empty() {
            return Err(ConfigError::Invalid("at least one identity is required".into()));
        }
        Ok(())
    }

    /// Worker settings derived from this configuration.
    pub fn submission(&self) -> SubmissionConfig {
        SubmissionConfig {
            retry: RetryPolicy::new(self.max_attempts),
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(self.backoff_base_delay_ms),
                max_delay: Duration::from_millis(self.backoff_max_delay_ms),
                strategy: self.backoff_strategy,
                jitter: self.backoff_jitter,
            },
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            worker_concurrency: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name}: cannot parse {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_config_values() {
        let config = RelayConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base_delay_ms, 500);
        assert_eq!(config.backoff_max_delay_ms, 60_000);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.submit_timeout_ms, 30_000);
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.identities, vec!["Org1MSP", "Org2MSP"]);
        assert_eq!(config.logging.format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_partial_toml() {
        let config = RelayConfig::from_toml_str(
            r#"
            max_attempts = 3
            backoff_strategy = "linear"
            identities = ["Org3MSP"]

            [logging]
            format = "text"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.identities, vec!["Org3MSP"]);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.submit_timeout_ms, 30_000);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            RelayConfig::from_toml_str("max_attempts = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = RelayConfig::from_toml_str("max_attempts = 3").unwrap();
        config
            .apply_env(vars(&[
                ("TXRELAY_MAX_ATTEMPTS", "7"),
                ("TXRELAY_BACKOFF_STRATEGY", "Fixed"),
                ("TXRELAY_IDENTITIES", "Org1MSP, Org4MSP,"),
                ("TXRELAY_LOG_FORMAT", "text"),
                ("TXRELAY_UNRELATED", "x"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Fixed);
        assert_eq!(config.identities, vec!["Org1MSP", "Org4MSP"]);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let mut config = RelayConfig::default();
        assert!(matches!(
            config.apply_env(vars(&[("TXRELAY_SUBMIT_TIMEOUT_MS", "soon")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(config
            .apply_env(vars(&[("TXRELAY_BACKOFF_STRATEGY", "random")]))
            .is_err());
    }

    #[test]
    fn validation_rules() {
        let invalid = [
            RelayConfig { max_attempts: 0, ..RelayConfig::default() },
            RelayConfig { worker_concurrency: 0, ..RelayConfig::default() },
            RelayConfig { backoff_jitter: 1.5, ..RelayConfig::default() },
            RelayConfig {
                backoff_base_delay_ms: 10_000,
                backoff_max_delay_ms: 1_000,
                ..RelayConfig::default()
            },
            RelayConfig { identities: Vec::new(), ..RelayConfig::default() },
        ];
        for config in invalid {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{config:?}");
        }
    }

    #[test]
    fn submission_config_mapping() {
        let config = RelayConfig {
            max_attempts: 3,
            backoff_base_delay_ms: 100,
            submit_timeout_ms: 2_000,
            ..RelayConfig::default()
        };
        let submission = config.submission();
        assert_eq!(submission.retry.max_attempts, 3);
        assert_eq!(submission.backoff.base_delay, Duration::from_millis(100));
        assert_eq!(submission.backoff.max_delay, Duration::from_secs(60));
        assert_eq!(submission.submit_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RelayConfig::load(Some(Path::new("/nonexistent/txrelay.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
