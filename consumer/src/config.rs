//! Configuration management for the consumer.
//!
//! Values come from a TOML file layered under the process environment: a key
//! set in the environment always wins. The file is optional. Its path is
//! taken from `CONSUMER_CONFIG_FILE`, defaulting to `config.toml` in the
//! working directory.
//!
//! ```toml
//! CONSUMER_BROKERS = "localhost:9092"
//! CONSUMER_TOPICS = ["operations", "operations-retry"]
//! CONSUMER_GROUP = "operations-consumer"
//! CONSUMER_BUFFER_SIZE = 500
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_FILE_VAR: &str = "CONSUMER_CONFIG_FILE";
/// Configuration file used when [`CONFIG_FILE_VAR`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const BROKERS: &str = "CONSUMER_BROKERS";
const TOPICS: &str = "CONSUMER_TOPICS";
const GROUP: &str = "CONSUMER_GROUP";
const AUTO_OFFSET_RESET: &str = "CONSUMER_AUTO_OFFSET_RESET";
const BUFFER_SIZE: &str = "CONSUMER_BUFFER_SIZE";
const SESSION_TIMEOUT_MS: &str = "CONSUMER_SESSION_TIMEOUT_MS";
const SERVICE_NAME: &str = "CONSUMER_SERVICE_NAME";
const KEEPALIVE_SECS: &str = "CONSUMER_KEEPALIVE_SECS";
const METRICS_ADDR: &str = "CONSUMER_METRICS_ADDR";

/// Configuration errors. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file exists but cannot be read
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML
    #[error("Failed to parse configuration file {path}: {reason}")]
    Parse {
        /// File path, or `<inline>` for in-memory sources
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// A required key is absent or empty
    #[error("Missing required configuration key {0}")]
    Missing(&'static str),

    /// A key is present but its value is unusable
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Configuration key
        key: &'static str,
        /// What is wrong with the value
        reason: String,
    },
}

/// Where configuration values are retrieved from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    file: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    origin: Option<PathBuf>,
}

impl ConfigSource {
    /// Build a source from the process environment and the configuration
    /// file, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] if the file exists
    /// but cannot be used.
    pub fn from_process() -> Result<Self, ConfigError> {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        let path = env
            .get(CONFIG_FILE_VAR)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);

        let mut source = Self::from_env(env);
        if path.is_file() {
            source = source.with_file(&path)?;
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using environment only");
        }
        Ok(source)
    }

    /// A source backed by the given environment only.
    #[must_use]
    pub fn from_env(env: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            env: env.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Layer the TOML file at `path` under this source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not a flat TOML table.
    pub fn with_file(self, path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut source = self.with_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        source.origin = Some(path.to_path_buf());
        Ok(source)
    }

    /// Layer TOML `contents` under this source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `contents` is not a flat TOML table of
    /// scalars or arrays of scalars.
    pub fn with_toml(mut self, contents: &str) -> Result<Self, ConfigError> {
        let parse_error = |reason: String| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            reason,
        };

        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| parse_error(e.to_string()))?;
        for (key, value) in table {
            let value = scalar(&value)
                .or_else(|| match &value {
                    toml::Value::Array(items) => items
                        .iter()
                        .map(scalar)
                        .collect::<Option<Vec<_>>>()
                        .map(|items| items.join(",")),
                    _ => None,
                })
                .ok_or_else(|| parse_error(format!("{key} must be a scalar or an array of scalars")))?;
            self.file.insert(key, value);
        }
        Ok(self)
    }

    /// The configuration file this source read, if any.
    #[must_use]
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Look up `key`. The environment wins over the file; blank values count
    /// as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .or_else(|| self.file.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: format!("{raw:?}: {e}"),
            })
        })
    }

    fn positive_or(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.parse_or(key, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(value)
    }
}

fn scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    source: ConfigSource,
    /// Comma-separated broker addresses
    pub brokers: String,
    /// Topics to consume
    pub topics: Vec<String>,
    /// Consumer group id
    pub consumer_group: String,
    /// Offset reset policy for a group with no committed offset
    pub auto_offset_reset: String,
    /// Envelopes buffered between the broker client and the service
    pub buffer_size: usize,
    /// Consumer group session timeout
    pub session_timeout: Duration,
    /// Name attached to every telemetry event
    pub service_name: String,
    /// Interval of the entrypoint's liveness log line
    pub keepalive: Duration,
    /// Prometheus listen address; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl ConsumerConfig {
    /// Build the configuration source from the process environment and the
    /// configuration file. Values are not retrieved until
    /// [`refresh`](Self::refresh).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be used.
    pub fn initialize() -> Result<Self, ConfigError> {
        ConfigSource::from_process().map(Self::with_source)
    }

    /// Configuration bound to `source`, holding defaults until refreshed.
    #[must_use]
    pub fn with_source(source: ConfigSource) -> Self {
        Self {
            source,
            brokers: String::new(),
            topics: Vec::new(),
            consumer_group: String::new(),
            auto_offset_reset: "latest".to_string(),
            buffer_size: 1000,
            session_timeout: Duration::from_millis(6000),
            service_name: "Consumer".to_string(),
            keepalive: Duration::from_secs(120),
            metrics_addr: None,
        }
    }

    /// Retrieve every value from the source.
    ///
    /// Either every field is updated or, on error, none is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for the first absent required key and
    /// [`ConfigError::Invalid`] for the first unusable value.
    pub fn refresh(&mut self) -> Result<(), ConfigError> {
        let source = &self.source;

        let brokers = source.require(BROKERS)?.to_string();
        let topics: Vec<String> = source
            .require(TOPICS)?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect();
        if topics.is_empty() {
            return Err(ConfigError::Invalid {
                key: TOPICS,
                reason: "no topic names".to_string(),
            });
        }
        let consumer_group = source.require(GROUP)?.to_string();

        let auto_offset_reset = source.get(AUTO_OFFSET_RESET).unwrap_or("latest").to_string();
        if !matches!(auto_offset_reset.as_str(), "earliest" | "latest" | "error") {
            return Err(ConfigError::Invalid {
                key: AUTO_OFFSET_RESET,
                reason: format!("{auto_offset_reset:?} is not one of earliest, latest, error"),
            });
        }

        let buffer_size = usize::try_from(source.positive_or(BUFFER_SIZE, 1000)?).map_err(|e| {
            ConfigError::Invalid {
                key: BUFFER_SIZE,
                reason: e.to_string(),
            }
        })?;
        let session_timeout = Duration::from_millis(source.positive_or(SESSION_TIMEOUT_MS, 6000)?);
        let service_name = source.get(SERVICE_NAME).unwrap_or("Consumer").to_string();
        let keepalive = Duration::from_secs(source.positive_or(KEEPALIVE_SECS, 120)?);
        let metrics_addr = source
            .get(METRICS_ADDR)
            .map(|raw| {
                raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                    key: METRICS_ADDR,
                    reason: format!("{raw:?}: {e}"),
                })
            })
            .transpose()?;

        self.brokers = brokers;
        self.topics = topics;
        self.consumer_group = consumer_group;
        self.auto_offset_reset = auto_offset_reset;
        self.buffer_size = buffer_size;
        self.session_timeout = session_timeout;
        self.service_name = service_name;
        self.keepalive = keepalive;
        self.metrics_addr = metrics_addr;

        tracing::info!(
            origin = ?self.source.origin(),
            brokers = %self.brokers,
            topics = ?self.topics,
            consumer_group = %self.consumer_group,
            "Configuration refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> ConfigSource {
        ConfigSource::from_env(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        )
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            (BROKERS, "localhost:9092"),
            (TOPICS, "operations, operations-retry"),
            (GROUP, "operations-consumer"),
        ]
    }

    fn refreshed(source: ConfigSource) -> Result<ConsumerConfig, ConfigError> {
        let mut config = ConsumerConfig::with_source(source);
        config.refresh()?;
        Ok(config)
    }

    #[test]
    fn required_keys_and_defaults() {
        let config = refreshed(env(&required())).unwrap();

        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.topics, ["operations", "operations-retry"]);
        assert_eq!(config.consumer_group, "operations-consumer");
        assert_eq!(config.auto_offset_reset, "latest");
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.session_timeout, Duration::from_millis(6000));
        assert_eq!(config.service_name, "Consumer");
        assert_eq!(config.keepalive, Duration::from_secs(120));
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn missing_required_key_is_reported() {
        let mut pairs = required();
        pairs.retain(|(k, _)| *k != GROUP);

        let error = refreshed(env(&pairs)).unwrap_err();
        assert!(matches!(error, ConfigError::Missing(GROUP)));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut pairs = required();
        pairs.push((BROKERS, "  "));
        pairs.remove(0);

        let error = refreshed(env(&pairs)).unwrap_err();
        assert!(matches!(error, ConfigError::Missing(BROKERS)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            (BUFFER_SIZE, "0"),
            (BUFFER_SIZE, "lots"),
            (KEEPALIVE_SECS, "0"),
            (METRICS_ADDR, "not-an-address"),
            (AUTO_OFFSET_RESET, "sometimes"),
            (TOPICS, " , "),
        ];

        for (key, value) in cases {
            let mut pairs = required();
            pairs.retain(|(k, _)| *k != key);
            pairs.push((key, value));

            match refreshed(env(&pairs)) {
                Err(ConfigError::Invalid { key: reported, .. }) => assert_eq!(reported, key),
                other => panic!("expected Invalid for {key}={value}, got {other:?}"),
            }
        }
    }

    #[test]
    fn failed_refresh_keeps_previous_values() {
        let mut config = refreshed(env(&required())).unwrap();

        let mut pairs = required();
        pairs.push((BUFFER_SIZE, "0"));
        config.source = env(&pairs);
        config.brokers = "kept".to_string();

        assert!(config.refresh().is_err());
        assert_eq!(config.brokers, "kept");
    }

    #[test]
    fn environment_wins_over_file() {
        let source = env(&[(BROKERS, "env:9092")])
            .with_toml(
                r#"
                CONSUMER_BROKERS = "file:9092"
                CONSUMER_TOPICS = ["a", "b"]
                CONSUMER_GROUP = "from-file"
                CONSUMER_BUFFER_SIZE = 50
                CONSUMER_METRICS_ADDR = "127.0.0.1:9464"
                "#,
            )
            .unwrap();

        let config = refreshed(source).unwrap();
        assert_eq!(config.brokers, "env:9092");
        assert_eq!(config.topics, ["a", "b"]);
        assert_eq!(config.consumer_group, "from-file");
        assert_eq!(config.buffer_size, 50);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9464".parse().unwrap()));
    }

    #[test]
    fn nested_tables_are_a_parse_error() {
        let result = ConfigSource::default().with_toml("[consumer]\nbrokers = \"x\"\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let result = ConfigSource::default().with_toml("CONSUMER_BROKERS = ");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn file_source_records_origin() {
        let path = std::env::temp_dir().join(format!(
            "event-consumer-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "CONSUMER_GROUP = \"from-file\"\n").unwrap();

        let source = ConfigSource::default().with_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(source.origin(), Some(path.as_path()));
        assert_eq!(source.get(GROUP), Some("from-file"));
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let path = std::env::temp_dir().join("event-consumer-config-does-not-exist.toml");
        let result = ConfigSource::default().with_file(&path);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
