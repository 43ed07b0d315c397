use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const ENV_CONFIG_PATH: &str = "TUMORBOARD_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "tumorboard.yaml";

const ENV_MODEL: &str = "TUMORBOARD_MODEL";
const ENV_TEMPERATURE: &str = "TUMORBOARD_TEMPERATURE";
const ENV_MAX_TOKENS: &str = "TUMORBOARD_MAX_TOKENS";
const ENV_MAX_RETRIES: &str = "TUMORBOARD_MAX_RETRIES";
const ENV_MAX_CONCURRENT: &str = "TUMORBOARD_MAX_CONCURRENT";
const ENV_REQUEST_TIMEOUT_SECS: &str = "TUMORBOARD_REQUEST_TIMEOUT_SECS";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f64 = 0.1;
const DEFAULT_MAX_TOKENS: u64 = 2000;
const DEFAULT_MAX_CONCURRENT: usize = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Retry/backoff settings for provider calls
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total provider calls per prompt, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 10_000,
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

/// Overall status of a batch run that had failing items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchExitPolicy {
    /// Succeed when at least one item was assessed (or the input was empty)
    #[default]
    AnySuccess,
    /// Succeed only when every item was assessed
    AllSucceeded,
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    pub max_concurrent: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub batch_exit_policy: BatchExitPolicy,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub retry: RetryConfig,
    pub max_concurrent: usize,
    pub request_timeout: Duration,
    pub batch_exit_policy: BatchExitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryConfig::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            batch_exit_policy: BatchExitPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, then apply environment overrides
    pub fn from_env() -> Self {
        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = Self::load_config_file(Path::new(&config_path))
            .map(Self::from_file)
            .unwrap_or_default();

        if let Ok(model) = std::env::var(ENV_MODEL) {
            config.model = model;
        }
        if let Some(temperature) = env_parse(ENV_TEMPERATURE) {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = env_parse(ENV_MAX_TOKENS) {
            config.max_tokens = max_tokens;
        }
        if let Some(max_attempts) = env_parse(ENV_MAX_RETRIES) {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(max_concurrent) = env_parse(ENV_MAX_CONCURRENT) {
            config.max_concurrent = max_concurrent;
        }
        if let Some(secs) = env_parse(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout = Duration::from_secs(secs);
        }

        config.normalized()
    }

    /// Build configuration from a parsed file, filling gaps with defaults
    pub fn from_file(file: ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            model: file.model.unwrap_or(defaults.model),
            temperature: file.temperature.unwrap_or(defaults.temperature),
            max_tokens: file.max_tokens.unwrap_or(defaults.max_tokens),
            retry: file.retry,
            max_concurrent: file.max_concurrent.unwrap_or(defaults.max_concurrent),
            request_timeout: file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            batch_exit_policy: file.batch_exit_policy,
        }
        .normalized()
    }

    /// At least one attempt and one in-flight request
    fn normalized(mut self) -> Self {
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.max_concurrent = self.max_concurrent.max(1);
        self
    }

    /// Load configuration from YAML file; an unusable file means defaults
    fn load_config_file(path: &Path) -> Option<ConfigFile> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match read_config_file(path) {
            Ok(file) => {
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                Some(file)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring config file, using defaults");
                None
            }
        }
    }
}

/// Why an existing config file could not be used
#[derive(Debug, thiserror::Error)]
enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// An empty file is an empty configuration
fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigFileError> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(&contents)?)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overrides_defaults() {
        let yaml = r#"
model: gpt-4o
retry:
  max_attempts: 5
max_concurrent: 0
batch_exit_policy: all_succeeded
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let config = Config::from_file(file);

        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 2000);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.batch_exit_policy, BatchExitPolicy::AllSucceeded);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        assert!(Config::load_config_file(Path::new("/nonexistent/tumorboard.yaml")).is_none());
    }

    #[test]
    fn test_unparseable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumorboard.yaml");
        fs::write(&path, "retry: [not, a, map]").unwrap();
        assert!(matches!(
            read_config_file(&path),
            Err(ConfigFileError::Parse(_))
        ));
        assert!(Config::load_config_file(&path).is_none());
    }

    #[test]
    fn test_unreadable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_config_file(dir.path()),
            Err(ConfigFileError::Read(_))
        ));
        assert!(Config::load_config_file(dir.path()).is_none());
    }

    #[test]
    fn test_empty_file_is_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumorboard.yaml");
        fs::write(&path, "  \n").unwrap();
        let file = Config::load_config_file(&path).unwrap();
        assert_eq!(Config::from_file(file), Config::default());
    }
}
