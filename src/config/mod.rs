use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_NAMESPACE: &str = "mirasynth";
const CONFIG_PREFIX: &str = "github-runner";
const CONFIG_FILENAME: &str = "config.toml";

/// Prefix for environment variables that override file values.
pub const ENV_PREFIX: &str = "GITHUB_RUNNER";

/// A required configuration value is missing or unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value `{0}`")]
    Missing(&'static str),
    #[error("invalid configuration value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read private key from {}: {source}", .path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3038
}

#[derive(Clone, Deserialize)]
pub struct GitHubConfig {
    /// Numeric GitHub App ID, used to find the app's installation
    pub app_id: Option<i64>,
    /// GitHub App client ID, used as the assertion issuer
    pub client_id: Option<String>,
    /// App private key in PEM format
    pub private_key: Option<String>,
    /// Path to the app private key, used when `private_key` is not set
    pub private_key_path: Option<PathBuf>,
    /// Shared secret for verifying webhook signatures
    pub webhook_secret: Option<String>,
    /// Repositories requested when minting installation tokens (empty = all)
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            client_id: None,
            private_key: None,
            private_key_path: None,
            webhook_secret: None,
            repositories: Vec::new(),
            api_url: default_api_url(),
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("app_id", &self.app_id)
            .field("client_id", &self.client_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("private_key_path", &self.private_key_path)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("repositories", &self.repositories)
            .field("api_url", &self.api_url)
            .finish()
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn non_empty<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

impl GitHubConfig {
    pub fn app_id(&self) -> Result<i64, ConfigError> {
        match self.app_id {
            Some(id) if id > 0 => Ok(id),
            Some(id) => Err(ConfigError::Invalid {
                key: "github.app_id",
                reason: format!("expected a positive integer, got {}", id),
            }),
            None => Err(ConfigError::Missing("github.app_id")),
        }
    }

    pub fn client_id(&self) -> Result<&str, ConfigError> {
        non_empty(&self.client_id, "github.client_id")
    }

    /// The app private key, inline or read from `private_key_path`.
    pub fn private_key(&self) -> Result<String, ConfigError> {
        if let Ok(pem) = non_empty(&self.private_key, "github.private_key") {
            return Ok(pem.to_string());
        }

        let path = self
            .private_key_path
            .as_ref()
            .ok_or(ConfigError::Missing("github.private_key"))?;
        let pem = std::fs::read_to_string(path).map_err(|source| ConfigError::KeyFile {
            path: path.clone(),
            source,
        })?;
        if pem.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "github.private_key_path",
                reason: format!("{} is empty", path.display()),
            });
        }
        Ok(pem)
    }

    pub fn webhook_secret(&self) -> Result<&str, ConfigError> {
        non_empty(&self.webhook_secret, "github.webhook_secret")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Config {
    /// Load configuration from `path`. Environment overrides are applied last.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Apply `GITHUB_RUNNER_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));

        if let Some(app_id) = var("APP_ID") {
            // An unparsable id is kept as invalid so validation reports it.
            self.github.app_id = Some(app_id.trim().parse().unwrap_or(-1));
        }
        if let Some(client_id) = var("CLIENT_ID") {
            self.github.client_id = Some(client_id);
        }
        if let Some(key) = var("PRIVATE_KEY") {
            self.github.private_key = Some(key);
        }
        if let Some(path) = var("PRIVATE_KEY_PATH") {
            self.github.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(secret) = var("WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(url) = var("API_URL") {
            self.github.api_url = url;
        }
    }
}

/// Location of the config file when `--config` is not given.
pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(dir
        .join(CONFIG_NAMESPACE)
        .join(CONFIG_PREFIX)
        .join(CONFIG_FILENAME))
}

/// The config file chosen at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    /// Whether an empty default file was created for this run.
    pub created: bool,
}

/// Pick the config file: `path` when given, otherwise the default location,
/// which is created empty (with its directory) if it does not exist.
///
/// Nothing is logged here because logging is configured from the file.
pub fn locate_config_file(path: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = path {
        return Ok(ConfigFile {
            path: path.to_path_buf(),
            created: false,
        });
    }

    let path = default_config_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    }
    let created = !path.exists();
    if created {
        std::fs::write(&path, "")
            .with_context(|| format!("Failed to create config file: {}", path.display()))?;
    }
    Ok(ConfigFile { path, created })
}
