//! Embedding provider abstraction, retry wrapper, and vector utilities.
//!
//! - [`EmbeddingProvider`]: one attempt at turning text into a vector.
//! - [`OllamaProvider`]: calls `POST /api/embeddings` on a local Ollama.
//! - [`DisabledProvider`]: used when `embedding.provider = "disabled"`.
//! - [`Embedder`]: wraps a provider with a fixed-delay [`RetryPolicy`] and
//!   degrades to `None` instead of failing.
//!
//! The text templates ([`table_embedding_text`], [`column_embedding_text`],
//! [`view_embedding_text`]) decide what each node kind is embedded as.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::models::{ColumnNode, TableNode, ViewNode};

/// How many times to try an embedding call and how long to wait between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// A text embedding backend. Implementations make a single attempt per
/// call; retrying is the [`Embedder`]'s job.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, mixed into embedding hashes.
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Whether calls can succeed at all.
    fn is_available(&self) -> bool {
        true
    }
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    fn is_available(&self) -> bool {
        false
    }
    async fn embed_once(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::ProviderUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Ollama Provider ============

/// Embedding provider backed by a local Ollama instance
/// (default `http://localhost:11434`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model,
            dims,
        })
    }

    /// Ask Ollama which models it has pulled and report whether ours is
    /// among them. A tag suffix (`name:latest`) is accepted.
    pub async fn check_model(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| {
                Error::ProviderUnavailable(format!(
                    "cannot reach Ollama at {} (is it running?): {}",
                    self.url, e
                ))
            })?;
        if !response.status().is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "Ollama returned {} for /api/tags",
                response.status()
            )));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        Ok(model_listed(&json, &self.model))
    }
}

fn model_listed(tags: &serde_json::Value, model: &str) -> bool {
    tags.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models.iter().filter_map(|m| m.get("name")?.as_str()).any(|name| {
                name == model || name.split(':').next() == Some(model)
            })
        })
        .unwrap_or(false)
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::ProviderUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::ProviderUnavailable(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::ProviderUnavailable("invalid Ollama response: missing embedding".to_string())
        })?;
    let vector: Vec<f32> = values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();
    if vector.is_empty() {
        return Err(Error::ProviderUnavailable(
            "Ollama returned an empty embedding".to_string(),
        ));
    }
    Ok(vector)
}

/// Build the provider named in the config.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Embedder ============

/// A provider plus retry policy. Never fails: an exhausted or disabled
/// provider yields `None`.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledProvider), RetryPolicy::default())
    }

    /// Build the configured provider and, for Ollama, check the model is
    /// pulled. A failed check is only a warning.
    pub async fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        if config.provider == "ollama" {
            let ollama = OllamaProvider::new(config)?;
            match ollama.check_model().await {
                Ok(true) => debug!(model = %ollama.model, "embedding model available"),
                Ok(false) => warn!(
                    model = %ollama.model,
                    "embedding model not found in Ollama; run `ollama pull {}`",
                    ollama.model
                ),
                Err(e) => warn!(error = %e, "could not verify embedding model"),
            }
            return Ok(Self::new(Arc::new(ollama), config.retry_policy()));
        }
        Ok(Self::new(create_provider(config)?, config.retry_policy()))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_available()
    }

    /// Embed `text`, retrying with a fixed delay. Returns `None` for blank
    /// input, a disabled provider, or once attempts are exhausted.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() || !self.provider.is_available() {
            return None;
        }

        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.provider.embed_once(text).await {
                Ok(vector) if !vector.is_empty() => return Some(vector),
                Ok(_) => warn!(attempt, "embedding provider returned an empty vector"),
                Err(e) => warn!(attempt, max_attempts = attempts, error = %e, "embedding attempt failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        warn!(model = %self.provider.model_name(), "giving up on embedding after {} attempts", attempts);
        None
    }

    /// Hash identifying `text` embedded under this embedder's model.
    pub fn hash(&self, text: &str) -> String {
        embedding_hash(text, self.provider.model_name())
    }
}

// ============ Text templates ============

/// Number of columns listed in a table's embedding text.
pub const TABLE_TEXT_COLUMNS: usize = 10;

pub fn table_embedding_text(table: &TableNode) -> String {
    let mut parts = vec![
        format!("Table: {}", table.name),
        format!("Module: {}", table.module),
        format!("Submodule: {}", table.submodule),
        format!("Description: {}", table.description.as_deref().unwrap_or("")),
    ];

    if let Some(pk) = &table.primary_key {
        if !pk.columns.trim().is_empty() {
            parts.push(format!("Primary Key: {}", pk.columns));
        }
    }

    let columns: Vec<String> = table
        .columns
        .iter()
        .take(TABLE_TEXT_COLUMNS)
        .map(|c| match c.comments.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(comments) => format!("{} ({}): {}", c.name, c.datatype, comments),
            None => format!("{} ({})", c.name, c.datatype),
        })
        .collect();
    if !columns.is_empty() {
        parts.push(format!("Important Columns: {}", columns.join("; ")));
    }

    parts.join("\n")
}

pub fn column_embedding_text(column: &ColumnNode) -> String {
    let mut parts = vec![
        format!("Column: {}", column.name),
        format!("Data Type: {}", column.datatype),
        format!("Table: {}", column.table_id),
    ];
    if let Some(desc) = column.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(format!("Description: {}", desc));
    }
    if column.is_primary_key {
        parts.push("This is a primary key column".to_string());
    }
    if column.is_foreign_key {
        if let Some(target) = &column.references_column {
            parts.push(format!("This is a foreign key referencing: {}", target));
        }
    }
    parts.join("\n")
}

/// Views are embedded by description only; no description, no embedding.
pub fn view_embedding_text(view: &ViewNode) -> Option<String> {
    view.description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

// ============ Vector utilities ============

/// SHA-256 over model name and text; a stored embedding is reusable when
/// this matches.
pub fn embedding_hash(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Encode a float vector as little-endian bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDef, PrimaryKey, TableDetails};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_once(&self, _text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(vec![1.0, 0.0])
            } else {
                Err(Error::ProviderUnavailable("down".into()))
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let provider = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let embedder = Embedder::new(provider.clone(), fast_policy(3));
        assert_eq!(embedder.embed("hello").await, Some(vec![1.0, 0.0]));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        });
        let embedder = Embedder::new(provider.clone(), fast_policy(3));
        assert_eq!(embedder.embed("hello").await, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn blank_text_and_disabled_provider_yield_none() {
        let provider = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let embedder = Embedder::new(provider.clone(), fast_policy(3));
        assert_eq!(embedder.embed("   ").await, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        assert_eq!(Embedder::disabled().embed("hello").await, None);
    }

    #[test]
    fn hash_depends_on_model_and_text() {
        let a = embedding_hash("Table: X", "m1");
        assert_eq!(a, embedding_hash("Table: X", "m1"));
        assert_ne!(a, embedding_hash("Table: X", "m2"));
        assert_ne!(a, embedding_hash("Table: Y", "m1"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn table_text_lists_first_ten_columns() {
        let columns = (0..12)
            .map(|i| ColumnDef {
                name: format!("C{}", i),
                datatype: "NUMBER".into(),
                length: None,
                precision: None,
                not_null: None,
                comments: if i == 0 { Some("the id".into()) } else { None },
                flexfield_mapping: None,
            })
            .collect();
        let table = TableNode {
            id: "t".into(),
            name: "T".into(),
            module: "Financials".into(),
            submodule: "Ledger".into(),
            description: Some("Ledger table".into()),
            details: TableDetails::default(),
            primary_key: Some(PrimaryKey {
                name: "T_PK".into(),
                columns: "C0".into(),
            }),
            columns,
            indexes: vec![],
            embedding: None,
            created_at: None,
            updated_at: None,
        };
        let text = table_embedding_text(&table);
        assert!(text.starts_with("Table: T\nModule: Financials\nSubmodule: Ledger\nDescription: Ledger table"));
        assert!(text.contains("Primary Key: C0"));
        assert!(text.contains("C0 (NUMBER): the id; C1 (NUMBER)"));
        assert!(text.contains("C9 (NUMBER)"));
        assert!(!text.contains("C10"));
    }

    #[test]
    fn column_text_mentions_keys() {
        let column = ColumnNode {
            id: "orders_customer_id".into(),
            name: "CUSTOMER_ID".into(),
            datatype: "NUMBER".into(),
            table_id: "orders".into(),
            description: None,
            length: None,
            precision: None,
            is_nullable: true,
            is_primary_key: false,
            is_foreign_key: true,
            references_column: Some("cust_account_customer_id".into()),
            embedding: None,
            created_at: None,
            updated_at: None,
        };
        let text = column_embedding_text(&column);
        assert_eq!(
            text,
            "Column: CUSTOMER_ID\nData Type: NUMBER\nTable: orders\nThis is a foreign key referencing: cust_account_customer_id"
        );
    }

    #[test]
    fn ollama_tags_match_with_or_without_tag() {
        let tags = serde_json::json!({"models": [{"name": "nomic-embed-text:latest"}]});
        assert!(model_listed(&tags, "nomic-embed-text"));
        assert!(model_listed(&tags, "nomic-embed-text:latest"));
        assert!(!model_listed(&tags, "mxbai-embed-large"));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_edge_cases() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
