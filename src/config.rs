//! TOML configuration parsing and validation.
//!
//! Every command reads one file (default `./config/sgraph.toml`). Sections
//! other than `[db]` are optional and fall back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::embedding::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Path to a loadable sqlite-vec extension. Without it the store has no
    /// vector index capability and retrieval scans embeddings directly.
    #[serde(default)]
    pub vector_extension: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("Tables")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Vector dimensionality used when creating vector indexes.
    pub fn index_dims(&self) -> usize {
        self.dims.unwrap_or(768)
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct JudgeConfig {
    #[serde(default = "default_judge_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: default_judge_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl JudgeConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_judge_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "JUDGE_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.judge.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown judge provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.judge.is_enabled() && config.judge.model.is_none() {
        anyhow::bail!(
            "judge.model must be specified when provider is '{}'",
            config.judge.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/g.sqlite\"\n").unwrap();
        assert!(!config.embedding.is_enabled());
        assert!(!config.judge.is_enabled());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.ingest.data_dir, PathBuf::from("Tables"));
        let policy = config.embedding.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(2000));
    }

    #[test]
    fn enabled_embedding_requires_dims_and_model() {
        let err = parse("[db]\npath = \"g.sqlite\"\n[embedding]\nprovider = \"ollama\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let err = parse(
            "[db]\npath = \"g.sqlite\"\n[embedding]\nprovider = \"ollama\"\ndims = 768\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_providers_rejected() {
        assert!(parse("[db]\npath = \"g.sqlite\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[db]\npath = \"g.sqlite\"\n[judge]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn zero_top_k_rejected() {
        assert!(parse("[db]\npath = \"g.sqlite\"\n[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let config = parse(
            "[db]\npath = \"g.sqlite\"\n[embedding]\nmax_attempts = 0\nretry_delay_ms = 5\n",
        )
        .unwrap();
        assert_eq!(config.embedding.retry_policy().max_attempts, 1);
    }
}
