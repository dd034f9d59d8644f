//! Service configuration for reclaim-api
//!
//! Combines the shared TOML configuration with command-line overrides and
//! builds the external provider clients. A provider without an API key is
//! left unconfigured: the service starts, and the features that need it
//! answer 503 (transcription) or use their fallback (AI text).

use std::path::PathBuf;
use std::sync::Arc;

use reclaim_common::api::load_or_initialize_secret;
use reclaim_common::config::{GeminiConfig, GladiaConfig, TomlConfig};
use reclaim_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::services::{GeminiClient, GladiaClient, TextGenerator, TranscriptionProvider};

/// `settings` key of the generated storage signing secret
pub const STORAGE_SECRET_SETTING: &str = "storage_signing_secret";

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub toml: TomlConfig,
    pub database_path: PathBuf,
    pub storage_root: PathBuf,
}

impl ServiceConfig {
    /// Apply CLI overrides (`--database`, `--port`) on top of the TOML values
    pub fn resolve(
        mut toml: TomlConfig,
        database_override: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Self {
        if let Some(port) = port_override {
            toml.server.port = port;
        }
        if let Some(path) = database_override {
            toml.database.path = Some(path);
        }

        Self {
            database_path: toml.database_path(),
            storage_root: toml.storage_root(),
            toml,
        }
    }

    pub fn bind_address(&self) -> String {
        self.toml.server.bind_address()
    }

    pub fn public_base_url(&self) -> String {
        self.toml.server.base_url()
    }
}

/// Configured signing secret, or the one persisted in `settings`
///
/// The persisted secret is generated on first use, so signed URLs stay valid
/// across restarts without any configuration.
pub async fn resolve_signing_secret(db: &SqlitePool, configured: Option<&str>) -> Result<String> {
    if let Some(secret) = configured.filter(|s| !s.trim().is_empty()) {
        info!("Storage signing secret loaded from configuration");
        return Ok(secret.to_string());
    }

    let secret = load_or_initialize_secret(db, STORAGE_SECRET_SETTING)
        .await
        .map_err(|e| Error::Config(format!("Storage signing secret unavailable: {}", e)))?;
    info!("Storage signing secret loaded from database");
    Ok(secret)
}

/// Gladia client, or `None` when no API key is configured
pub fn build_transcription_provider(config: &GladiaConfig) -> Option<Arc<dyn TranscriptionProvider>> {
    let Some(api_key) = config.api_key.clone() else {
        warn!("Gladia API key not configured; audio transcription disabled");
        return None;
    };

    match GladiaClient::new(api_key, &config.base_url, config.requests_per_second) {
        Ok(client) => {
            info!(base_url = %config.base_url, "Gladia transcription enabled");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!(error = %e, "Failed to build Gladia client; audio transcription disabled");
            None
        }
    }
}

/// Gemini client, or `None` when no API key is configured
pub fn build_text_generator(config: &GeminiConfig) -> Option<Arc<dyn TextGenerator>> {
    let Some(api_key) = config.api_key.clone() else {
        warn!("Gemini API key not configured; AI features use fallbacks");
        return None;
    };

    match GeminiClient::new(
        api_key,
        &config.base_url,
        &config.model,
        config.requests_per_minute,
    ) {
        Ok(client) => {
            info!(model = %config.model, "Gemini text generation enabled");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!(error = %e, "Failed to build Gemini client; AI features use fallbacks");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_win() {
        let config = ServiceConfig::resolve(
            TomlConfig::default(),
            Some(PathBuf::from("/tmp/override.db")),
            Some(9999),
        );

        assert_eq!(config.database_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.bind_address(), "127.0.0.1:9999");
        assert_eq!(config.public_base_url(), "http://127.0.0.1:9999");
    }

    #[test]
    fn test_missing_keys_disable_providers() {
        assert!(build_transcription_provider(&GladiaConfig::default()).is_none());
        assert!(build_text_generator(&GeminiConfig::default()).is_none());
    }

    #[test]
    fn test_keys_enable_providers() {
        let gladia = GladiaConfig {
            api_key: Some("key".into()),
            ..Default::default()
        };
        let gemini = GeminiConfig {
            api_key: Some("key".into()),
            ..Default::default()
        };
        assert!(build_transcription_provider(&gladia).is_some());
        assert!(build_text_generator(&gemini).is_some());
    }

    #[tokio::test]
    async fn test_configured_secret_beats_generated() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        reclaim_common::db::create_schema(&pool).await.unwrap();

        assert_eq!(
            resolve_signing_secret(&pool, Some("explicit")).await.unwrap(),
            "explicit"
        );

        let generated = resolve_signing_secret(&pool, None).await.unwrap();
        assert_eq!(generated, resolve_signing_secret(&pool, Some("  ")).await.unwrap());
    }
}
