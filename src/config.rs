//! Configuration parsing and validation.
//!
//! siftd is configured via a TOML file (default:
//! `$XDG_CONFIG_HOME/siftd/config.toml`, see [`crate::paths`]). The surface
//! is a fixed, enumerated key set (Design Notes §9) — no arbitrary code
//! evaluation, only struct fields with defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embeddings_db: EmbeddingsDbConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "crate::paths::default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { path: crate::paths::default_db_path() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsDbConfig {
    #[serde(default = "crate::paths::default_embeddings_db_path")]
    pub path: PathBuf,
}

impl Default for EmbeddingsDbConfig {
    fn default() -> Self {
        Self { path: crate::paths::default_embeddings_db_path() }
    }
}

/// `search.*` keys (§4.6).
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_formatter")]
    pub formatter: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_recall")]
    pub recall: i64,
    #[serde(default = "default_true")]
    pub diversity: bool,
    #[serde(default = "default_true")]
    pub exclude_active: bool,
    #[serde(default = "default_true")]
    pub exclude_derivative: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            formatter: default_formatter(),
            limit: default_limit(),
            threshold: None,
            lambda: default_lambda(),
            recall: default_recall(),
            diversity: true,
            exclude_active: true,
            exclude_derivative: true,
        }
    }
}

fn default_formatter() -> String {
    "text".to_string()
}
fn default_limit() -> i64 {
    10
}
fn default_lambda() -> f64 {
    0.7
}
fn default_recall() -> i64 {
    200
}
fn default_true() -> bool {
    true
}

/// Chunker/indexer tuning (§4.5).
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_target_tokens() -> usize {
    256
}
fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    25
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub backend: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model: None,
            dimension: None,
            api_base: None,
            api_key_env: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_backend() -> String {
    "none".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "none"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { max_age_hours: default_max_age_hours() }
    }
}

fn default_max_age_hours() -> i64 {
    48
}

pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.search.lambda) {
        anyhow::bail!("search.lambda must be in [0.0, 1.0]");
    }
    if config.search.limit < 0 {
        anyhow::bail!("search.limit must be >= 0 (0 means \"no trim\")");
    }
    if let Some(threshold) = config.search.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("search.threshold must be in [0.0, 1.0]");
        }
    }
    if config.indexer.target_tokens == 0 || config.indexer.max_tokens == 0 {
        anyhow::bail!("indexer.target_tokens and indexer.max_tokens must be > 0");
    }
    if config.indexer.target_tokens > config.indexer.max_tokens {
        anyhow::bail!("indexer.target_tokens must be <= indexer.max_tokens");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be set when embedding.backend is '{}'", config.embedding.backend);
        }
        match config.embedding.dimension {
            Some(0) | None => anyhow::bail!("embedding.dimension must be > 0 when embedding is enabled"),
            _ => {}
        }
        if config.embedding.backend != "http" {
            anyhow::bail!("Unknown embedding.backend: '{}'. Must be 'none' or 'http'.", config.embedding.backend);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn rejects_lambda_out_of_range() {
        let mut config = Config::default();
        config.search.lambda = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_limit_is_allowed() {
        let mut config = Config::default();
        config.search.limit = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dimension() {
        let mut config = Config::default();
        config.embedding.backend = "http".to_string();
        assert!(validate(&config).is_err());
        config.embedding.model = Some("text-embedding-3-small".to_string());
        assert!(validate(&config).is_err());
        config.embedding.dimension = Some(1536);
        assert!(validate(&config).is_ok());
    }
}
