//! Server configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Upstream sensor API settings.
    pub upstream: UpstreamConfig,
    /// Background refresh settings.
    pub refresh: RefreshConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every error found.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage path is not empty
    /// - Upstream base URL is http(s) and credentials are present
    /// - Upstream timeout is 1 to 300 seconds
    /// - Refresh interval is 1 minute to 1 day
    ///
    /// # Example
    ///
    /// ```
    /// use noise_service::Config;
    ///
    /// let mut config = Config::default();
    /// config.upstream.username = "dashboard".to_string();
    /// config.upstream.password = "secret".to_string();
    /// config.validate().expect("config with credentials should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.upstream.validate());
        errors.extend(self.refresh.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:3001").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3001".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: noise_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Minimum upstream request timeout in seconds.
pub const MIN_UPSTREAM_TIMEOUT: u64 = 1;
/// Maximum upstream request timeout in seconds (5 minutes).
pub const MAX_UPSTREAM_TIMEOUT: u64 = 300;

/// Upstream sensor API configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the Sonitus API.
    pub base_url: String,
    /// Account name forwarded on every request.
    pub username: String,
    /// Account password forwarded on every request.
    pub password: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: noise_upstream::DEFAULT_BASE_URL.to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl UpstreamConfig {
    /// Validate upstream configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError::new(
                "upstream.base_url",
                format!(
                    "invalid URL '{}': must start with http:// or https://",
                    self.base_url
                ),
            ));
        }

        if self.username.is_empty() {
            errors.push(ValidationError::new(
                "upstream.username",
                "username cannot be empty",
            ));
        }

        if self.password.is_empty() {
            errors.push(ValidationError::new(
                "upstream.password",
                "password cannot be empty",
            ));
        }

        if !(MIN_UPSTREAM_TIMEOUT..=MAX_UPSTREAM_TIMEOUT).contains(&self.timeout_secs) {
            errors.push(ValidationError::new(
                "upstream.timeout_secs",
                format!(
                    "timeout {} is out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_UPSTREAM_TIMEOUT, MAX_UPSTREAM_TIMEOUT
                ),
            ));
        }

        errors
    }

    /// Credentials for the upstream client.
    pub fn credentials(&self) -> noise_upstream::Credentials {
        noise_upstream::Credentials::new(&self.username, &self.password)
    }

    /// Apply `SONITUS_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, returning the variables that were used.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        let fields: [(&'static str, &mut String); 3] = [
            (BASE_URL_ENV, &mut self.base_url),
            (USERNAME_ENV, &mut self.username),
            (PASSWORD_ENV, &mut self.password),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
                applied.push(key);
            }
        }
        applied
    }
}

/// Environment variable overriding `upstream.base_url`.
pub const BASE_URL_ENV: &str = "SONITUS_BASE_URL";
/// Environment variable overriding `upstream.username`.
pub const USERNAME_ENV: &str = "SONITUS_USERNAME";
/// Environment variable overriding `upstream.password`.
pub const PASSWORD_ENV: &str = "SONITUS_PASSWORD";

/// Minimum refresh interval in seconds (1 minute).
pub const MIN_REFRESH_INTERVAL: u64 = 60;
/// Maximum refresh interval in seconds (1 day).
pub const MAX_REFRESH_INTERVAL: u64 = 86_400;

/// Background refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Whether the background refresher runs.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

impl RefreshConfig {
    /// Validate refresh configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_REFRESH_INTERVAL {
            errors.push(ValidationError::new(
                "refresh.interval_secs",
                format!(
                    "refresh interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_REFRESH_INTERVAL
                ),
            ));
        } else if self.interval_secs > MAX_REFRESH_INTERVAL {
            errors.push(ValidationError::new(
                "refresh.interval_secs",
                format!(
                    "refresh interval {} is too long (maximum {} seconds / 1 day)",
                    self.interval_secs, MAX_REFRESH_INTERVAL
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `upstream.timeout_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("noise-dashboard")
        .join("server.toml")
}
