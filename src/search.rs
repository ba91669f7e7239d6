//! Similarity retrieval over node embeddings.
//!
//! Two paths, chosen per node kind at query time:
//!
//! - **Index**: the kind has a vector index, so the backend's own
//!   nearest-neighbour ranking is returned as-is, top `limit`, no cutoff.
//! - **Scan**: no index, so every stored embedding of that kind is scored
//!   by cosine similarity, anything at or below [`FALLBACK_MIN_SIMILARITY`]
//!   is dropped, and the rest is sorted and truncated.
//!
//! A query that cannot be embedded yields no results rather than an error.

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::models::NodeKind;
use crate::store::GraphStore;

/// Scan-path cutoff. Candidates must score strictly above this.
pub const FALLBACK_MIN_SIMILARITY: f32 = 0.5;

/// Characters of SQL text carried on a view hit.
pub const SQL_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub similarity: f32,
    #[serde(flatten)]
    pub detail: HitDetail,
}

/// Kind-specific fields of a hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HitDetail {
    Table {
        module: String,
        submodule: String,
    },
    Column {
        datatype: String,
        table_id: String,
    },
    View {
        module: String,
        submodule: String,
        sql_query: String,
    },
}

pub struct Retriever<'a> {
    store: &'a dyn GraphStore,
    embedder: &'a Embedder,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a dyn GraphStore, embedder: &'a Embedder) -> Self {
        Self { store, embedder }
    }

    /// Up to `limit` nodes of `kind`, most similar to `query` first.
    pub async fn search(&self, query: &str, kind: NodeKind, limit: usize) -> Vec<SearchHit> {
        let Some(vector) = self.embedder.embed(query).await else {
            warn!(%kind, "could not embed query; returning no results");
            return Vec::new();
        };
        match self.rank(&vector, kind, limit).await {
            Ok(ranked) => self.hydrate(kind, ranked).await,
            Err(e) => {
                warn!(%kind, error = %e, "similarity search failed");
                Vec::new()
            }
        }
    }

    /// Column search restricted to columns owned by `table_ids`.
    pub async fn search_columns_in(
        &self,
        query: &str,
        table_ids: &[String],
        limit: usize,
    ) -> Vec<SearchHit> {
        let Some(vector) = self.embedder.embed(query).await else {
            warn!("could not embed query; returning no results");
            return Vec::new();
        };
        match self.rank_scoped(&vector, table_ids, limit).await {
            Ok(ranked) => self.hydrate(NodeKind::Column, ranked).await,
            Err(e) => {
                warn!(error = %e, "scoped column search failed");
                Vec::new()
            }
        }
    }

    /// Rank ids of `kind` against an already embedded query.
    pub async fn rank(
        &self,
        vector: &[f32],
        kind: NodeKind,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        if self.store.vector_index_exists(kind).await? {
            match self.store.vector_index_query(kind, vector, limit).await {
                Ok(ranked) => return Ok(ranked),
                Err(e) => warn!(%kind, error = %e, "vector index query failed, scanning instead"),
            }
        } else {
            debug!(%kind, "no vector index, scanning stored embeddings");
        }

        let candidates = self.store.embedded_nodes(kind, None).await?;
        Ok(rank_candidates(vector, candidates, limit, Some(FALLBACK_MIN_SIMILARITY)))
    }

    /// Scoped ranking is always an exact scan over the in-scope columns; the
    /// cutoff applies only when the column kind has no vector index.
    pub async fn rank_scoped(
        &self,
        vector: &[f32],
        table_ids: &[String],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let scope: Vec<String> = table_ids.iter().map(|t| t.to_lowercase()).collect();
        let floor = if self.store.vector_index_exists(NodeKind::Column).await? {
            None
        } else {
            Some(FALLBACK_MIN_SIMILARITY)
        };
        let candidates = self
            .store
            .embedded_nodes(NodeKind::Column, Some(&scope))
            .await?;
        Ok(rank_candidates(vector, candidates, limit, floor))
    }

    async fn hydrate(&self, kind: NodeKind, ranked: Vec<(String, f32)>) -> Vec<SearchHit> {
        let mut hits = Vec::with_capacity(ranked.len());
        for (id, similarity) in ranked {
            match self.load_hit(kind, &id, similarity).await {
                Ok(Some(hit)) => hits.push(hit),
                Ok(None) => debug!(%kind, id = %id, "ranked node no longer stored"),
                Err(e) => warn!(%kind, id = %id, error = %e, "failed to load ranked node"),
            }
        }
        hits
    }

    async fn load_hit(&self, kind: NodeKind, id: &str, similarity: f32) -> Result<Option<SearchHit>> {
        Ok(match kind {
            NodeKind::Table => self.store.get_table(id).await?.map(|t| SearchHit {
                id: t.id,
                name: t.name,
                description: t.description,
                similarity,
                detail: HitDetail::Table {
                    module: t.module,
                    submodule: t.submodule,
                },
            }),
            NodeKind::Column => self.store.get_column(id).await?.map(|c| SearchHit {
                id: c.id,
                name: c.name,
                description: c.description,
                similarity,
                detail: HitDetail::Column {
                    datatype: c.datatype,
                    table_id: c.table_id,
                },
            }),
            NodeKind::View => self.store.get_view(id).await?.map(|v| SearchHit {
                id: v.id,
                name: v.name,
                description: v.description,
                similarity,
                detail: HitDetail::View {
                    module: v.module,
                    submodule: v.submodule,
                    sql_query: v.sql_query.chars().take(SQL_EXCERPT_CHARS).collect(),
                },
            }),
        })
    }
}

/// Score, optionally cut off (strictly above `floor`), sort descending with
/// id as tie-break, truncate.
pub fn rank_candidates(
    query: &[f32],
    candidates: Vec<(String, Vec<f32>)>,
    limit: usize,
    floor: Option<f32>,
) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = candidates
        .into_iter()
        .map(|(id, vector)| {
            let score = cosine_similarity(query, &vector);
            (id, score)
        })
        .filter(|(_, score)| floor.map_or(true, |f| *score > f))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<(String, Vec<f32>)> {
        vec![
            ("a".into(), vec![1.0, 0.0]),
            ("b".into(), vec![0.6, 0.8]),
            ("c".into(), vec![0.0, 1.0]),
            ("d".into(), vec![1.0, 2.0]),
            ("e".into(), vec![0.9, 0.435_89]),
        ]
    }

    #[test]
    fn floor_is_strict_and_order_descending() {
        let ranked = rank_candidates(&[1.0, 0.0], candidates(), 10, Some(0.5));
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        // d scores about 0.45 and c scores 0.0
        assert_eq!(ids, vec!["a", "e", "b"]);
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn no_floor_keeps_everything_up_to_limit() {
        let ranked = rank_candidates(&[1.0, 0.0], candidates(), 4, None);
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0].0, "a");
        assert!(ranked.iter().any(|(id, _)| id == "d"));
    }

    #[test]
    fn truncates_to_limit() {
        let ranked = rank_candidates(&[1.0, 0.0], candidates(), 1, Some(0.5));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, "a");
    }
}
