//! Storage abstraction for the schema graph.
//!
//! [`GraphStore`] is the property-graph surface everything above it is
//! written against: idempotent node upserts, existence-checked edge
//! creation, per-label vector indexes, and the read paths used by retrieval
//! and the command layer.
//!
//! | Backend | Vector index |
//! |---------|--------------|
//! | [`sqlite::SqliteGraphStore`] | sqlite-vec `vec0` tables, when the extension is loaded |
//! | [`memory::MemoryGraphStore`] | optional brute-force stand-in, for tests |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{ColumnNode, Edge, NodeKind, TableNode, TableReference, ViewNode};

/// A column node together with the column it references, if any.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDetails {
    #[serde(flatten)]
    pub column: ColumnNode,
    pub referenced_column_name: Option<String>,
    pub referenced_table_id: Option<String>,
}

/// Aggregate counts reported by `info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub tables: i64,
    pub columns: i64,
    pub views: i64,
    pub primary_key_columns: i64,
    pub foreign_key_columns: i64,
    /// Edge counts keyed by edge label.
    pub edges: BTreeMap<String, i64>,
    pub tables_by_module: BTreeMap<String, i64>,
    /// Number of nodes carrying an embedding, keyed by node label.
    pub embedded: BTreeMap<String, i64>,
    pub vector_capable: bool,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create per-label uniqueness constraints and, when the backend is
    /// vector capable, per-label vector indexes of `dims` dimensions.
    /// Safe to call repeatedly.
    async fn initialize(&self, dims: usize) -> Result<()>;

    /// Whether the backend supports vector indexes at all. Decided once,
    /// when the store is opened.
    fn vector_capable(&self) -> bool;

    /// Match-or-create by id. `created_at` is set on create only;
    /// `updated_at` is set to `now` either way. The node's `embedding` is
    /// written as given, together with `embedding_hash`.
    async fn upsert_table(
        &self,
        table: &TableNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn upsert_column(
        &self,
        column: &ColumnNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn upsert_view(
        &self,
        view: &ViewNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// The stored embedding of a node and the hash it was computed from.
    async fn stored_embedding(&self, kind: NodeKind, id: &str)
        -> Result<Option<(Vec<f32>, String)>>;

    /// Replace a node's embedding in place, keeping every other property.
    async fn set_embedding(
        &self,
        kind: NodeKind,
        id: &str,
        embedding: &[f32],
        embedding_hash: &str,
    ) -> Result<()>;

    /// Ids of nodes without an embedding, oldest first. Views with no
    /// description are left out since they have no text to embed.
    async fn missing_embeddings(&self, kind: NodeKind, limit: usize) -> Result<Vec<String>>;

    async fn node_exists(&self, kind: NodeKind, id: &str) -> Result<bool>;

    /// Match-or-create an edge between existing nodes. Returns `false`
    /// without writing anything when either endpoint is missing.
    async fn create_edge(&self, edge: &Edge) -> Result<bool>;

    async fn vector_index_exists(&self, kind: NodeKind) -> Result<bool>;

    /// Nearest neighbours from the vector index, best first, as
    /// `(id, similarity)`. Fails with `CapabilityUnsupported` when there is
    /// no index.
    async fn vector_index_query(
        &self,
        kind: NodeKind,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>>;

    /// Every stored embedding of a label. For columns, `table_scope`
    /// narrows the set to columns owned by the given tables.
    async fn embedded_nodes(
        &self,
        kind: NodeKind,
        table_scope: Option<&[String]>,
    ) -> Result<Vec<(String, Vec<f32>)>>;

    async fn get_table(&self, id: &str) -> Result<Option<TableNode>>;
    async fn get_column(&self, id: &str) -> Result<Option<ColumnNode>>;
    async fn get_view(&self, id: &str) -> Result<Option<ViewNode>>;

    /// Column nodes under a table, primary keys first, then by name.
    async fn columns_for_table(&self, table_id: &str) -> Result<Vec<ColumnNode>>;

    async fn column_details(&self, id: &str) -> Result<Option<ColumnDetails>>;

    /// Table-level `REFERENCES` edges touching `table_id`, in either
    /// direction.
    async fn table_references(&self, table_id: &str) -> Result<Vec<TableReference>>;

    async fn stats(&self) -> Result<GraphStats>;
}

/// Sort order for a table's live column list.
pub(crate) fn sort_columns(columns: &mut [ColumnNode]) {
    columns.sort_by(|a, b| {
        b.is_primary_key
            .cmp(&a.is_primary_key)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Parse `v0.1.6` / `0.1.6-alpha` into a comparable triple.
pub(crate) fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
    let trimmed = raw.trim().trim_start_matches('v');
    let core = trimmed.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/// Oldest sqlite-vec release whose `vec0` tables accept text primary keys
/// and a cosine distance metric.
pub(crate) const MIN_VECTOR_VERSION: (u32, u32, u32) = (0, 1, 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("v0.1.6"), Some((0, 1, 6)));
        assert_eq!(parse_version("0.1.7-alpha.2"), Some((0, 1, 7)));
        assert_eq!(parse_version("1"), Some((1, 0, 0)));
        assert_eq!(parse_version("garbage"), None);
        assert!(parse_version("v0.1.0").unwrap() < MIN_VECTOR_VERSION);
        assert!(parse_version("v0.1.1").unwrap() >= MIN_VECTOR_VERSION);
    }
}
