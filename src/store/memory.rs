//! In-memory [`GraphStore`] for tests.
//!
//! Nodes live in `HashMap`s behind `std::sync::RwLock`. Constructed with
//! [`MemoryGraphStore::with_vector_index`], it reports vector capability and
//! answers index queries by exact cosine ranking, which is enough to
//! exercise both retrieval paths without sqlite-vec.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{sort_columns, ColumnDetails, GraphStats, GraphStore};
use crate::embedding::{cosine_similarity, view_embedding_text};
use crate::error::{Error, Result};
use crate::models::{
    ColumnNode, Edge, EdgeKind, NodeKind, TableNode, TableReference, ViewNode,
};

struct Entry<T> {
    node: T,
    hash: Option<String>,
}

pub struct MemoryGraphStore {
    tables: RwLock<HashMap<String, Entry<TableNode>>>,
    columns: RwLock<HashMap<String, Entry<ColumnNode>>>,
    views: RwLock<HashMap<String, Entry<ViewNode>>>,
    edges: RwLock<Vec<Edge>>,
    indexes: RwLock<HashSet<NodeKind>>,
    vector_capable: bool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            columns: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
            indexes: RwLock::new(HashSet::new()),
            vector_capable: false,
        }
    }

    /// A store that advertises vector capability.
    pub fn with_vector_index() -> Self {
        Self {
            vector_capable: true,
            ..Self::new()
        }
    }

    /// Every edge currently stored, in creation order.
    pub fn edges(&self) -> Vec<Edge> {
        read(&self.edges).clone()
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared upsert rule: keep the stored `created_at`, stamp `updated_at`.
fn upsert<T: Clone>(
    map: &RwLock<HashMap<String, Entry<T>>>,
    id: &str,
    node: &T,
    hash: Option<&str>,
    now: DateTime<Utc>,
    stamp: impl Fn(&mut T, DateTime<Utc>, DateTime<Utc>),
    created: impl Fn(&T) -> Option<DateTime<Utc>>,
) {
    let mut map = write(map);
    let created_at = map
        .get(id)
        .and_then(|existing| created(&existing.node))
        .unwrap_or(now);
    let mut node = node.clone();
    stamp(&mut node, created_at, now);
    map.insert(
        id.to_string(),
        Entry {
            node,
            hash: hash.map(str::to_string),
        },
    );
}

impl MemoryGraphStore {
    fn embedding_of(&self, kind: NodeKind, id: &str) -> Option<(Option<Vec<f32>>, Option<String>)> {
        match kind {
            NodeKind::Table => read(&self.tables)
                .get(id)
                .map(|e| (e.node.embedding.clone(), e.hash.clone())),
            NodeKind::Column => read(&self.columns)
                .get(id)
                .map(|e| (e.node.embedding.clone(), e.hash.clone())),
            NodeKind::View => read(&self.views)
                .get(id)
                .map(|e| (e.node.embedding.clone(), e.hash.clone())),
        }
    }

    fn all_embeddings(&self, kind: NodeKind) -> Vec<(String, Option<String>, Option<Vec<f32>>, Option<DateTime<Utc>>)> {
        match kind {
            NodeKind::Table => read(&self.tables)
                .values()
                .map(|e| (e.node.id.clone(), None, e.node.embedding.clone(), e.node.created_at))
                .collect(),
            NodeKind::Column => read(&self.columns)
                .values()
                .map(|e| {
                    (
                        e.node.id.clone(),
                        Some(e.node.table_id.clone()),
                        e.node.embedding.clone(),
                        e.node.created_at,
                    )
                })
                .collect(),
            NodeKind::View => read(&self.views)
                .values()
                .map(|e| (e.node.id.clone(), None, e.node.embedding.clone(), e.node.created_at))
                .collect(),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn initialize(&self, _dims: usize) -> Result<()> {
        if self.vector_capable {
            write(&self.indexes).extend(NodeKind::ALL);
        }
        Ok(())
    }

    fn vector_capable(&self) -> bool {
        self.vector_capable
    }

    async fn upsert_table(
        &self,
        table: &TableNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        upsert(
            &self.tables,
            &table.id,
            table,
            embedding_hash,
            now,
            |n, c, u| {
                n.created_at = Some(c);
                n.updated_at = Some(u);
            },
            |n| n.created_at,
        );
        Ok(())
    }

    async fn upsert_column(
        &self,
        column: &ColumnNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        upsert(
            &self.columns,
            &column.id,
            column,
            embedding_hash,
            now,
            |n, c, u| {
                n.created_at = Some(c);
                n.updated_at = Some(u);
            },
            |n| n.created_at,
        );
        Ok(())
    }

    async fn upsert_view(
        &self,
        view: &ViewNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        upsert(
            &self.views,
            &view.id,
            view,
            embedding_hash,
            now,
            |n, c, u| {
                n.created_at = Some(c);
                n.updated_at = Some(u);
            },
            |n| n.created_at,
        );
        Ok(())
    }

    async fn stored_embedding(
        &self,
        kind: NodeKind,
        id: &str,
    ) -> Result<Option<(Vec<f32>, String)>> {
        Ok(match self.embedding_of(kind, id) {
            Some((Some(vector), Some(hash))) => Some((vector, hash)),
            _ => None,
        })
    }

    async fn set_embedding(
        &self,
        kind: NodeKind,
        id: &str,
        embedding: &[f32],
        embedding_hash: &str,
    ) -> Result<()> {
        let hash = Some(embedding_hash.to_string());
        let vector = Some(embedding.to_vec());
        match kind {
            NodeKind::Table => {
                if let Some(e) = write(&self.tables).get_mut(id) {
                    e.node.embedding = vector;
                    e.hash = hash;
                }
            }
            NodeKind::Column => {
                if let Some(e) = write(&self.columns).get_mut(id) {
                    e.node.embedding = vector;
                    e.hash = hash;
                }
            }
            NodeKind::View => {
                if let Some(e) = write(&self.views).get_mut(id) {
                    e.node.embedding = vector;
                    e.hash = hash;
                }
            }
        }
        Ok(())
    }

    async fn missing_embeddings(&self, kind: NodeKind, limit: usize) -> Result<Vec<String>> {
        let candidates = self.all_embeddings(kind);
        let views = read(&self.views);
        let mut missing: Vec<_> = candidates
            .into_iter()
            .filter(|(_, _, vector, _)| vector.is_none())
            .filter(|(id, _, _, _)| match kind {
                NodeKind::View => views
                    .get(id)
                    .is_some_and(|e| view_embedding_text(&e.node).is_some()),
                NodeKind::Table | NodeKind::Column => true,
            })
            .map(|(id, _, _, created)| (created, id))
            .collect();
        missing.sort();
        Ok(missing.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn node_exists(&self, kind: NodeKind, id: &str) -> Result<bool> {
        Ok(match kind {
            NodeKind::Table => read(&self.tables).contains_key(id),
            NodeKind::Column => read(&self.columns).contains_key(id),
            NodeKind::View => read(&self.views).contains_key(id),
        })
    }

    async fn create_edge(&self, edge: &Edge) -> Result<bool> {
        if !self.node_exists(edge.source_kind, &edge.source_id).await?
            || !self.node_exists(edge.target_kind, &edge.target_id).await?
        {
            return Ok(false);
        }
        let mut edges = write(&self.edges);
        if !edges.iter().any(|e| e.key() == edge.key()) {
            edges.push(edge.clone());
        }
        Ok(true)
    }

    async fn vector_index_exists(&self, kind: NodeKind) -> Result<bool> {
        Ok(read(&self.indexes).contains(&kind))
    }

    async fn vector_index_query(
        &self,
        kind: NodeKind,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        if !read(&self.indexes).contains(&kind) {
            return Err(Error::CapabilityUnsupported(format!(
                "no vector index for {}",
                kind
            )));
        }
        let mut scored: Vec<(String, f32)> = self
            .all_embeddings(kind)
            .into_iter()
            .filter_map(|(id, _, vector, _)| vector.map(|v| (id, cosine_similarity(query, &v))))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn embedded_nodes(
        &self,
        kind: NodeKind,
        table_scope: Option<&[String]>,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let mut nodes: Vec<(String, Vec<f32>)> = self
            .all_embeddings(kind)
            .into_iter()
            .filter(|(_, owner, _, _)| match (table_scope, owner) {
                (Some(scope), Some(owner)) => scope.iter().any(|t| t == owner),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .filter_map(|(id, _, vector, _)| vector.map(|v| (id, v)))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(nodes)
    }

    async fn get_table(&self, id: &str) -> Result<Option<TableNode>> {
        Ok(read(&self.tables).get(id).map(|e| e.node.clone()))
    }

    async fn get_column(&self, id: &str) -> Result<Option<ColumnNode>> {
        Ok(read(&self.columns).get(id).map(|e| e.node.clone()))
    }

    async fn get_view(&self, id: &str) -> Result<Option<ViewNode>> {
        Ok(read(&self.views).get(id).map(|e| e.node.clone()))
    }

    async fn columns_for_table(&self, table_id: &str) -> Result<Vec<ColumnNode>> {
        let linked: HashSet<String> = read(&self.edges)
            .iter()
            .filter(|e| e.kind == EdgeKind::HasColumn && e.source_id == table_id)
            .map(|e| e.target_id.clone())
            .collect();
        let mut columns: Vec<ColumnNode> = read(&self.columns)
            .values()
            .filter(|e| linked.contains(&e.node.id))
            .map(|e| e.node.clone())
            .collect();
        sort_columns(&mut columns);
        Ok(columns)
    }

    async fn column_details(&self, id: &str) -> Result<Option<ColumnDetails>> {
        let Some(column) = self.get_column(id).await? else {
            return Ok(None);
        };
        let target = read(&self.edges)
            .iter()
            .find(|e| {
                e.kind == EdgeKind::References
                    && e.source_kind == NodeKind::Column
                    && e.source_id == id
            })
            .map(|e| e.target_id.clone());
        let referenced = match target {
            Some(target) => self.get_column(&target).await?,
            None => None,
        };
        Ok(Some(ColumnDetails {
            column,
            referenced_column_name: referenced.as_ref().map(|c| c.name.clone()),
            referenced_table_id: referenced.map(|c| c.table_id),
        }))
    }

    async fn table_references(&self, table_id: &str) -> Result<Vec<TableReference>> {
        Ok(read(&self.edges)
            .iter()
            .filter(|e| {
                e.kind == EdgeKind::References
                    && e.source_kind == NodeKind::Table
                    && (e.source_id == table_id || e.target_id == table_id)
            })
            .map(|e| TableReference {
                source_id: e.source_id.clone(),
                target_id: e.target_id.clone(),
                foreign_key_column: e.foreign_key_column.clone().unwrap_or_default(),
            })
            .collect())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats {
            vector_capable: self.vector_capable,
            ..GraphStats::default()
        };
        {
            let tables = read(&self.tables);
            stats.tables = tables.len() as i64;
            for entry in tables.values() {
                *stats
                    .tables_by_module
                    .entry(entry.node.module.clone())
                    .or_insert(0) += 1;
            }
        }
        {
            let columns = read(&self.columns);
            stats.columns = columns.len() as i64;
            stats.primary_key_columns =
                columns.values().filter(|e| e.node.is_primary_key).count() as i64;
            stats.foreign_key_columns =
                columns.values().filter(|e| e.node.is_foreign_key).count() as i64;
        }
        stats.views = read(&self.views).len() as i64;

        let mut edges = BTreeMap::new();
        for edge in read(&self.edges).iter() {
            *edges.entry(edge.kind.label().to_string()).or_insert(0) += 1;
        }
        stats.edges = edges;

        for kind in NodeKind::ALL {
            let count = self
                .all_embeddings(kind)
                .iter()
                .filter(|(_, _, vector, _)| vector.is_some())
                .count() as i64;
            stats.embedded.insert(kind.label().to_string(), count);
        }
        Ok(stats)
    }
}
