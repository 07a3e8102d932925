//! Process configuration.
//!
//! Both binaries read their configuration from the environment; the
//! GitOps worker also accepts a YAML file via `CONFIG_PATH` for local
//! runs. Missing required credentials and malformed durations are
//! configuration errors, reported before anything starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "heal8s-system";
const DEFAULT_POLL_INTERVAL: &str = "10s";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_PRIVATE_KEY_PATH: &str = "/secrets/github-app.pem";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("malformed duration \"{0}\"")]
    MalformedDuration(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Configuration for the operator process (webhook + controller).
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the controller watches
    pub namespace: String,
    /// Address the HTTP server binds to
    pub bind_addr: String,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            namespace: env_or("K8S_NAMESPACE", DEFAULT_NAMESPACE),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
        })
    }
}

/// Configuration for the GitOps worker process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub github: GitHubAppConfig,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,
}

/// GitHub App credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    #[serde(rename = "appID")]
    pub app_id: u64,

    #[serde(rename = "installationID")]
    pub installation_id: u64,

    #[serde(rename = "privateKeyPath", default = "default_private_key_path")]
    pub private_key_path: String,
}

fn default_private_key_path() -> String {
    DEFAULT_PRIVATE_KEY_PATH.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernetesConfig {
    /// Namespace to poll for pending remediations
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// Poll interval as a duration string (e.g. "10s")
    #[serde(rename = "pollInterval", default = "default_poll_interval")]
    pub poll_interval: String,

    /// Maximum records handled per poll cycle
    #[serde(rename = "batchSize", default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_poll_interval() -> String {
    DEFAULT_POLL_INTERVAL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl WorkerConfig {
    /// Load from the environment. `GITHUB_APP_ID` and
    /// `GITHUB_INSTALLATION_ID` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_id = required_u64("GITHUB_APP_ID")?;
        let installation_id = required_u64("GITHUB_INSTALLATION_ID")?;

        let config = Self {
            github: GitHubAppConfig {
                app_id,
                installation_id,
                private_key_path: env_or("GITHUB_PRIVATE_KEY_PATH", DEFAULT_PRIVATE_KEY_PATH),
            },
            kubernetes: KubernetesConfig {
                namespace: env_or("K8S_NAMESPACE", DEFAULT_NAMESPACE),
            },
            processor: ProcessorConfig {
                poll_interval: env_or("POLL_INTERVAL", DEFAULT_POLL_INTERVAL),
                batch_size: match std::env::var("BATCH_SIZE") {
                    Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                        field: "BATCH_SIZE",
                        value: raw,
                    })?,
                    Err(_) => DEFAULT_BATCH_SIZE,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.github.app_id == 0 {
            return Err(ConfigError::MissingRequiredField("GITHUB_APP_ID"));
        }
        if self.github.installation_id == 0 {
            return Err(ConfigError::MissingRequiredField("GITHUB_INSTALLATION_ID"));
        }
        // Fail early on a malformed interval instead of at loop start.
        parse_duration(&self.processor.poll_interval)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.processor.poll_interval)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn required_u64(key: &'static str) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|_| ConfigError::InvalidValue {
            field: key,
            value: raw,
        }),
        _ => Err(ConfigError::MissingRequiredField(key)),
    }
}

/// Parse a duration string: `30s`, `5m`, `24h`, or a bare number of
/// seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::MalformedDuration(s.to_string()))?;

    let secs = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => return Err(ConfigError::MalformedDuration(s.to_string())),
    };

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("ten seconds").is_err());
    }

    #[test]
    fn test_worker_config_from_yaml() {
        let yaml = r#"
github:
  appID: 12345
  installationID: 67890
  privateKeyPath: /tmp/key.pem
kubernetes:
  namespace: heal8s-system
processor:
  pollInterval: 30s
  batchSize: 5
"#;
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.github.app_id, 12345);
        assert_eq!(config.processor.batch_size, 5);
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_worker_config_defaults() {
        let yaml = r#"
github:
  appID: 1
  installationID: 2
"#;
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.kubernetes.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.processor.poll_interval, "10s");
        assert_eq!(config.processor.batch_size, 10);
        assert_eq!(config.github.private_key_path, DEFAULT_PRIVATE_KEY_PATH);
    }

    #[test]
    fn test_worker_config_rejects_zero_app_id() {
        let yaml = r#"
github:
  appID: 0
  installationID: 2
"#;
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequiredField("GITHUB_APP_ID"))
        ));
    }

    #[test]
    fn test_worker_config_rejects_bad_interval() {
        let yaml = r#"
github:
  appID: 1
  installationID: 2
processor:
  pollInterval: soon
"#;
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MalformedDuration(_))
        ));
    }
}
