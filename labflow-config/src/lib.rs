//! ABOUTME: Central configuration for labflow: TOML parsing plus env overrides
//! ABOUTME: Sections cover providers, database, object storage, pipeline, server

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file discovery order.
const CONFIG_SEARCH_PATHS: &[&str] = &["labflow.toml", ".labflow.toml", "config/labflow.toml"];

/// Environment variable prefix.
const ENV_PREFIX: &str = "LABFLOW_";

/// Central labflow configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LabFlowConfig {
    pub providers: ProvidersConfig,
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreSettings,
    pub pipeline: PipelineSettings,
    pub server: ServerSettings,
}

/// Provider credentials and model selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub ocr: OcrProviderConfig,
    pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OcrProviderConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
}

impl Default for OcrProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.mistral.ai".to_string(),
            model: "mistral-ocr-latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmProviderConfig {
    pub api_key: String,
    pub endpoint: String,
    pub extraction_model: String,
    pub insight_model: String,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://openrouter.ai/api/v1".to_string(),
            extraction_model: "deepseek/deepseek-chat".to_string(),
            insight_model: "deepseek/deepseek-chat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_pool_size: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObjectStoreSettings {
    pub endpoint: String,
    pub bucket: String,
    pub api_key: String,
    pub signed_url_ttl_secs: u64,
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: "documents".to_string(),
            api_key: String::new(),
            signed_url_ttl_secs: 3600,
        }
    }
}

/// Pipeline timing knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// End-to-end deadline per document.
    pub deadline_secs: u64,
    /// Age after which a processing document counts as stuck.
    pub stuck_threshold_secs: u64,
    /// Watchdog sweep cadence.
    pub sweep_interval_secs: u64,
    /// Minimum visible dwell before the saving stage.
    pub dwell_ms: u64,
    /// Per-subscriber progress queue capacity.
    pub event_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            deadline_secs: 600,
            stuck_threshold_secs: 300,
            sweep_interval_secs: 60,
            dwell_ms: 500,
            event_buffer: 16,
        }
    }
}

impl PipelineSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

/// Settings consumed by the HTTP layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub cors_origins: Vec<String>,
    pub upload_dir: String,
    pub max_upload_bytes: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            cors_origins: vec!["http://localhost:4200".to_string()],
            upload_dir: "uploads".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment error: {message}")]
    Environment { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LabFlowConfig {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> LabFlowConfigBuilder {
        LabFlowConfigBuilder::new()
    }

    /// Load configuration from a TOML file with env overrides and validation.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Walk the discovery paths and load the first config file found, or the
    /// defaults (still env-overridden) when none exists.
    pub async fn load_discovered() -> Result<Self, ConfigError> {
        for candidate in CONFIG_SEARCH_PATHS {
            let path = PathBuf::from(candidate);
            if path.is_file() {
                debug!(path = %path.display(), "loading discovered config file");
                return Self::load_from_file(&path).await;
            }
        }
        debug!("no config file found, using defaults");
        Self::from_toml("")
    }

    /// Parse TOML content, apply env overrides, and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: LabFlowConfig = toml::from_str(content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LABFLOW_`-prefixed environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_string(&mut self.providers.ocr.api_key, "OCR_API_KEY");
        override_string(&mut self.providers.ocr.endpoint, "OCR_ENDPOINT");
        override_string(&mut self.providers.ocr.model, "OCR_MODEL");

        override_string(&mut self.providers.llm.api_key, "LLM_API_KEY");
        override_string(&mut self.providers.llm.endpoint, "LLM_ENDPOINT");
        override_string(&mut self.providers.llm.extraction_model, "EXTRACTION_MODEL");
        override_string(&mut self.providers.llm.insight_model, "INSIGHT_MODEL");

        override_string(&mut self.database.url, "DATABASE_URL");

        override_string(&mut self.object_store.endpoint, "STORAGE_ENDPOINT");
        override_string(&mut self.object_store.bucket, "STORAGE_BUCKET");
        override_string(&mut self.object_store.api_key, "STORAGE_API_KEY");

        override_parsed(&mut self.pipeline.deadline_secs, "DEADLINE_SECS")?;
        override_parsed(&mut self.pipeline.stuck_threshold_secs, "STUCK_THRESHOLD_SECS")?;
        override_parsed(&mut self.pipeline.sweep_interval_secs, "SWEEP_INTERVAL_SECS")?;

        override_string(&mut self.server.upload_dir, "UPLOAD_DIR");
        if let Some(origins) = env_var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    /// Structural validation of timing and capacity settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.deadline_secs == 0 {
            return Err(ConfigError::Validation {
                message: "pipeline.deadline_secs must be positive".to_string(),
            });
        }
        if self.pipeline.stuck_threshold_secs == 0 {
            return Err(ConfigError::Validation {
                message: "pipeline.stuck_threshold_secs must be positive".to_string(),
            });
        }
        if self.pipeline.dwell_ms >= self.pipeline.deadline_secs * 1000 {
            return Err(ConfigError::Validation {
                message: "pipeline.dwell_ms must be below the deadline".to_string(),
            });
        }
        if self.pipeline.event_buffer == 0 {
            return Err(ConfigError::Validation {
                message: "pipeline.event_buffer must be positive".to_string(),
            });
        }
        if self.pipeline.event_buffer < 8 {
            warn!(
                event_buffer = self.pipeline.event_buffer,
                "small event buffer; slow subscribers will drop events aggressively"
            );
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Validation {
                message: "server.max_upload_bytes must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn override_string(target: &mut String, suffix: &str) {
    if let Some(value) = env_var(suffix) {
        *target = value;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, suffix: &str) -> Result<(), ConfigError> {
    if let Some(value) = env_var(suffix) {
        *target = value.parse().map_err(|_| ConfigError::Environment {
            message: format!("{ENV_PREFIX}{suffix} is not a valid value: {value}"),
        })?;
    }
    Ok(())
}

/// Builder for `LabFlowConfig`.
#[derive(Debug, Clone, Default)]
pub struct LabFlowConfigBuilder {
    config: LabFlowConfig,
}

impl LabFlowConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = url.into();
        self
    }

    #[must_use]
    pub fn ocr_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.providers.ocr.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn llm_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.providers.llm.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn deadline_secs(mut self, secs: u64) -> Self {
        self.config.pipeline.deadline_secs = secs;
        self
    }

    #[must_use]
    pub fn stuck_threshold_secs(mut self, secs: u64) -> Self {
        self.config.pipeline.stuck_threshold_secs = secs;
        self
    }

    pub fn build(self) -> Result<LabFlowConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_sensible() {
        let config = LabFlowConfig::default();
        assert_eq!(config.pipeline.deadline_secs, 600);
        assert_eq!(config.pipeline.stuck_threshold_secs, 300);
        assert_eq!(config.pipeline.dwell_ms, 500);
        assert_eq!(config.pipeline.event_buffer, 16);
        assert_eq!(config.server.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn toml_sections_parse() {
        let config = LabFlowConfig::from_toml(
            r#"
            [providers.ocr]
            api_key = "ocr-key"
            model = "mistral-ocr-2505"

            [providers.llm]
            api_key = "llm-key"
            extraction_model = "deepseek/deepseek-chat-v3"

            [database]
            url = "postgresql://localhost/labflow"

            [pipeline]
            deadline_secs = 120
            dwell_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.providers.ocr.api_key, "ocr-key");
        assert_eq!(config.providers.ocr.model, "mistral-ocr-2505");
        assert_eq!(
            config.providers.llm.extraction_model,
            "deepseek/deepseek-chat-v3"
        );
        // Unset fields keep their defaults.
        assert_eq!(config.providers.llm.insight_model, "deepseek/deepseek-chat");
        assert_eq!(config.pipeline.deadline_secs, 120);
        assert_eq!(config.pipeline.stuck_threshold_secs, 300);
    }

    #[test]
    #[serial]
    fn env_variables_override_toml() {
        std::env::set_var("LABFLOW_OCR_API_KEY", "from-env");
        std::env::set_var("LABFLOW_DEADLINE_SECS", "90");
        std::env::set_var("LABFLOW_CORS_ORIGINS", "http://a.test, http://b.test");

        let config = LabFlowConfig::from_toml(
            r#"
            [providers.ocr]
            api_key = "from-toml"
            "#,
        )
        .unwrap();

        std::env::remove_var("LABFLOW_OCR_API_KEY");
        std::env::remove_var("LABFLOW_DEADLINE_SECS");
        std::env::remove_var("LABFLOW_CORS_ORIGINS");

        assert_eq!(config.providers.ocr.api_key, "from-env");
        assert_eq!(config.pipeline.deadline_secs, 90);
        assert_eq!(
            config.server.cors_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    #[serial]
    fn invalid_env_number_is_an_error() {
        std::env::set_var("LABFLOW_DEADLINE_SECS", "soon");
        let result = LabFlowConfig::from_toml("");
        std::env::remove_var("LABFLOW_DEADLINE_SECS");
        assert!(matches!(result, Err(ConfigError::Environment { .. })));
    }

    #[test]
    #[serial]
    fn zero_deadline_fails_validation() {
        let result = LabFlowConfig::from_toml("[pipeline]\ndeadline_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn builder_produces_validated_config() {
        let config = LabFlowConfig::builder()
            .database_url("postgresql://localhost/labflow")
            .ocr_api_key("k1")
            .llm_api_key("k2")
            .deadline_secs(60)
            .build()
            .unwrap();
        assert_eq!(config.database.url, "postgresql://localhost/labflow");
        assert_eq!(config.pipeline.deadline_secs, 60);
    }

    #[tokio::test]
    #[serial]
    async fn load_from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labflow.toml");
        std::fs::write(&path, "[database]\nurl = \"postgresql://file/labflow\"\n").unwrap();

        let config = LabFlowConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.database.url, "postgresql://file/labflow");
    }
}
