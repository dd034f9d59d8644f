//! Configuration loading and resolution
//!
//! Configuration file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `RECLAIM_CONFIG` environment variable
//! 3. User config file (`~/.config/reclaim/reclaim.toml` or platform equivalent)
//! 4. Compiled defaults (fallback)
//!
//! A missing config file never prevents startup: a warning is logged and
//! compiled defaults are used. Secrets (provider API keys, storage signing
//! secret) may additionally come from environment variables, which take
//! priority over TOML values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RECLAIM_CONFIG";
/// Environment variable holding the Gladia API key
pub const GLADIA_KEY_ENV_VAR: &str = "RECLAIM_GLADIA_API_KEY";
/// Environment variable holding the Gemini API key
pub const GEMINI_KEY_ENV_VAR: &str = "RECLAIM_GEMINI_API_KEY";
/// Environment variable holding the storage URL signing secret
pub const STORAGE_SECRET_ENV_VAR: &str = "RECLAIM_STORAGE_SECRET";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub gladia: GladiaConfig,
    pub gemini: GeminiConfig,
    pub transcription: TranscriptionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used when signing storage URLs that
    /// Gladia must be able to download. Defaults to `http://{host}:{port}`.
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file; defaults to `{data_dir}/reclaim.db`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for evidence files; defaults to `{data_dir}/storage`
    pub root: Option<PathBuf>,
    pub signing_secret: Option<String>,
    pub url_ttl_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            signing_secret: None,
            url_ttl_secs: 3600,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GladiaConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub requests_per_second: u32,
}

impl Default for GladiaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.gladia.io".to_string(),
            requests_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub requests_per_minute: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            requests_per_minute: 60,
        }
    }
}

/// Polling and reconciliation timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Wall-clock budget of one background poll loop
    pub poll_timeout_secs: u64,
    /// A job still processing after this long is failed by the sweeper
    pub job_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Processing rows untouched for this long are picked up by the sweeper
    pub stale_after_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            poll_timeout_secs: 300,
            job_timeout_secs: 3_600,
            sweep_interval_secs: 60,
            stale_after_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Database file path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("reclaim.db"))
    }

    /// Evidence storage root, falling back to the platform data directory
    pub fn storage_root(&self) -> PathBuf {
        self.storage
            .root
            .clone()
            .unwrap_or_else(|| default_data_dir().join("storage"))
    }

    /// Overlay secrets from environment variables (ENV beats TOML)
    pub fn apply_env_overrides(&mut self) {
        self.gladia.api_key = resolve_secret(
            "Gladia API key",
            std::env::var(GLADIA_KEY_ENV_VAR).ok(),
            self.gladia.api_key.take(),
        );
        self.gemini.api_key = resolve_secret(
            "Gemini API key",
            std::env::var(GEMINI_KEY_ENV_VAR).ok(),
            self.gemini.api_key.take(),
        );
        self.storage.signing_secret = resolve_secret(
            "storage signing secret",
            std::env::var(STORAGE_SECRET_ENV_VAR).ok(),
            self.storage.signing_secret.take(),
        );
    }
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no explicit path is given and the default user config
/// file does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config file
    default_config_path().filter(|p| p.exists())
}

/// Load configuration from `path`, or compiled defaults when absent
///
/// A missing file logs a warning and yields defaults. A file that exists but
/// fails to parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
            let config = TomlConfig::from_toml_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            info!("No config file found, using compiled defaults");
            TomlConfig::default()
        }
    };

    config.apply_env_overrides();
    Ok(config)
}

/// Validate secret value (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Pick a secret from ENV or TOML, ENV first
///
/// Warns when both sources carry a value, since that usually means a stale
/// entry in one of them.
pub fn resolve_secret(
    name: &str,
    env_value: Option<String>,
    toml_value: Option<String>,
) -> Option<String> {
    let env_value = env_value.filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    match (env_value, toml_value) {
        (Some(env), Some(_)) => {
            warn!(
                "{} found in both environment and TOML config. Using environment (highest priority).",
                name
            );
            Some(env)
        }
        (Some(env), None) => Some(env),
        (None, Some(toml)) => Some(toml),
        (None, None) => None,
    }
}

/// Default user config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("reclaim").join("reclaim.toml"))
}

/// OS-dependent default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("reclaim"))
        .unwrap_or_else(|| PathBuf::from("./reclaim_data"))
}
