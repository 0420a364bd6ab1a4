use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PolicyError, Result};
use crate::normalizer::{FolderMode, NameMode};
use crate::provider::ProviderKind;

/// Largest message batch any provider accepts in one modify call
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub outlook: OutlookConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_cache_path: default_token_cache_path(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlookConfig {
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    /// File holding a bearer token written by the sign-in helper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<PathBuf>,
    /// Environment variable consulted before `token_path`
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub name_mode: NameMode,
    #[serde(default)]
    pub folder_mode: FolderMode,
}

impl Default for OutlookConfig {
    fn default() -> Self {
        Self {
            graph_base_url: default_graph_base_url(),
            token_path: None,
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
            name_mode: NameMode::default(),
            folder_mode: FolderMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub delete_missing: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            delete_missing: false,
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sample_limit: default_sample_limit(),
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from(".mail-policy/gmail-token.json")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_token_env() -> String {
    "MAIL_POLICY_OUTLOOK_TOKEN".to_string()
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_merge_threshold() -> usize {
    2
}

fn default_sample_limit() -> usize {
    10
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PolicyError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| PolicyError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PolicyError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PolicyError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| PolicyError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.gmail.request_timeout_secs == 0 || self.outlook.request_timeout_secs == 0 {
            return Err(PolicyError::ConfigError(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if !self.outlook.graph_base_url.starts_with("http://")
            && !self.outlook.graph_base_url.starts_with("https://")
        {
            return Err(PolicyError::ConfigError(format!(
                "outlook.graph_base_url must be an http(s) URL, got '{}'",
                self.outlook.graph_base_url
            )));
        }

        if self.outlook.token_env.trim().is_empty() {
            return Err(PolicyError::ConfigError(
                "outlook.token_env cannot be empty".to_string(),
            ));
        }

        if self.execution.batch_size == 0 || self.execution.batch_size > MAX_BATCH_SIZE {
            return Err(PolicyError::ConfigError(format!(
                "execution.batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(PolicyError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(PolicyError::ConfigError(
                "retry.backoff_factor must be a finite number >= 1.0".to_string(),
            ));
        }

        if self.optimizer.merge_threshold == 0 {
            return Err(PolicyError::ConfigError(
                "optimizer.merge_threshold must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
