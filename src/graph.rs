//! Persisting parsed schemas into the graph.
//!
//! [`GraphBuilder`] sits between the parser and a [`GraphStore`]. It attaches
//! embeddings to nodes on their way in and turns every store failure into a
//! logged `false`, so a bulk load always runs to the end and reports per
//! category how much of it landed.
//!
//! Persist order within a load: tables, then columns with their
//! `HAS_COLUMN` edges, then column and table `REFERENCES` edges, then views
//! with their `USES_TABLE` edges. Edges are only attempted after both
//! endpoint kinds have been written.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::embedding::{
    column_embedding_text, table_embedding_text, view_embedding_text, Embedder,
};
use crate::models::{ColumnNode, Edge, NodeKind, TableNode, ViewNode};
use crate::resolve::ParsedSchema;
use crate::store::GraphStore;

/// Succeeded-of-attempted counter for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub succeeded: usize,
    pub attempted: usize,
}

impl Tally {
    fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.succeeded += 1;
        }
    }

    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.succeeded, self.attempted)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub tables: Tally,
    /// A column counts as loaded only once its `HAS_COLUMN` edge exists too.
    pub columns: Tally,
    pub column_references: Tally,
    pub relationships: Tally,
    pub views: Tally,
    pub view_tables: Tally,
    /// Nodes that ended up with an embedding, of those that had text to embed.
    pub embeddings: Tally,
    pub embeddings_reused: usize,
}

/// Result of attaching an embedding to a node.
struct Attached {
    embedding: Option<Vec<f32>>,
    hash: Option<String>,
    reused: bool,
    /// Kept from an earlier text because the provider failed.
    stale: bool,
}

pub struct GraphBuilder<'a> {
    store: &'a dyn GraphStore,
    embedder: &'a Embedder,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(store: &'a dyn GraphStore, embedder: &'a Embedder) -> Self {
        Self { store, embedder }
    }

    /// Reuse the stored embedding when its hash matches `text` under the
    /// current model, otherwise ask the provider. With embeddings disabled,
    /// whatever is stored is kept.
    async fn attach(&self, kind: NodeKind, id: &str, text: Option<String>) -> Attached {
        let stored = match self.store.stored_embedding(kind, id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(%kind, id, error = %e, "could not read stored embedding");
                None
            }
        };

        let Some(text) = text else {
            return Attached {
                embedding: None,
                hash: None,
                reused: false,
                stale: false,
            };
        };

        if !self.embedder.is_enabled() {
            let (embedding, hash) = match stored {
                Some((vector, hash)) => (Some(vector), Some(hash)),
                None => (None, None),
            };
            let reused = embedding.is_some();
            return Attached {
                embedding,
                hash,
                reused,
                stale: false,
            };
        }

        let hash = self.embedder.hash(&text);
        let previous = match stored {
            Some((vector, stored_hash)) if stored_hash == hash => {
                return Attached {
                    embedding: Some(vector),
                    hash: Some(hash),
                    reused: true,
                    stale: false,
                };
            }
            other => other,
        };

        match self.embedder.embed(&text).await {
            Some(vector) => Attached {
                embedding: Some(vector),
                hash: Some(hash),
                reused: false,
                stale: false,
            },
            // The old hash no longer matches the text, so the next load
            // retries the provider.
            None => match previous {
                Some((vector, stored_hash)) => {
                    warn!(%kind, id, "re-embedding failed, keeping previous embedding");
                    Attached {
                        embedding: Some(vector),
                        hash: Some(stored_hash),
                        reused: false,
                        stale: true,
                    }
                }
                None => {
                    warn!(%kind, id, "storing node without embedding");
                    Attached {
                        embedding: None,
                        hash: None,
                        reused: false,
                        stale: false,
                    }
                }
            },
        }
    }

    pub async fn upsert_table(&self, table: &TableNode, report: &mut LoadReport) -> bool {
        let attached = self
            .attach(NodeKind::Table, &table.id, Some(table_embedding_text(table)))
            .await;
        note_embedding(report, &attached, true);

        let mut node = table.clone();
        node.embedding = attached.embedding;
        match self
            .store
            .upsert_table(&node, attached.hash.as_deref(), Utc::now())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(table = %table.id, error = %e, "failed to upsert table");
                false
            }
        }
    }

    pub async fn upsert_column(&self, column: &ColumnNode, report: &mut LoadReport) -> bool {
        let attached = self
            .attach(NodeKind::Column, &column.id, Some(column_embedding_text(column)))
            .await;
        note_embedding(report, &attached, true);

        let mut node = column.clone();
        node.embedding = attached.embedding;
        match self
            .store
            .upsert_column(&node, attached.hash.as_deref(), Utc::now())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(column = %column.id, error = %e, "failed to upsert column");
                false
            }
        }
    }

    pub async fn upsert_view(&self, view: &ViewNode, report: &mut LoadReport) -> bool {
        let text = view_embedding_text(view);
        let has_text = text.is_some();
        let attached = self.attach(NodeKind::View, &view.id, text).await;
        note_embedding(report, &attached, has_text);

        let mut node = view.clone();
        node.embedding = attached.embedding;
        match self
            .store
            .upsert_view(&node, attached.hash.as_deref(), Utc::now())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(view = %view.id, error = %e, "failed to upsert view");
                false
            }
        }
    }

    /// Match-or-create one edge. A missing endpoint is an expected outcome
    /// of partial loads and is only logged at debug level.
    pub async fn create_edge(&self, edge: &Edge) -> bool {
        match self.store.create_edge(edge).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    kind = %edge.kind,
                    source = %edge.source_id,
                    target = %edge.target_id,
                    "edge endpoint missing, not created"
                );
                false
            }
            Err(e) => {
                warn!(kind = %edge.kind, source = %edge.source_id, target = %edge.target_id, error = %e, "failed to create edge");
                false
            }
        }
    }

    /// Write a whole resolved run.
    pub async fn persist(&self, parsed: &ParsedSchema) -> LoadReport {
        let mut report = LoadReport::default();

        info!(count = parsed.tables.len(), "loading tables");
        for table in parsed.tables.values() {
            let ok = self.upsert_table(table, &mut report).await;
            report.tables.record(ok);
        }

        info!(count = parsed.columns.len(), "loading columns");
        for column in parsed.columns.values() {
            let ok = self.upsert_column(column, &mut report).await
                && self
                    .create_edge(&Edge::has_column(&column.table_id, &column.id))
                    .await;
            report.columns.record(ok);
        }

        // Targets may come from an earlier load, so every flagged column is
        // tried against the store rather than only this run's references.
        for column in parsed.columns.values().filter(|c| c.is_foreign_key) {
            let Some(target) = column.references_column.as_deref() else {
                continue;
            };
            let ok = self.create_edge(&Edge::column_reference(&column.id, target)).await;
            report.column_references.record(ok);
        }

        info!(count = parsed.relationships.len(), "loading relationships");
        for reference in &parsed.relationships {
            let ok = self.create_edge(&Edge::table_reference(reference)).await;
            report.relationships.record(ok);
        }

        if !parsed.views.is_empty() {
            info!(count = parsed.views.len(), "loading views");
        }
        for view in parsed.views.values() {
            self.add_view_into(view, &mut report).await;
        }

        report
    }

    /// Upsert a single view and link it to the tables it uses.
    pub async fn add_view(&self, view: &ViewNode) -> LoadReport {
        let mut report = LoadReport::default();
        self.add_view_into(view, &mut report).await;
        report
    }

    async fn add_view_into(&self, view: &ViewNode, report: &mut LoadReport) {
        let ok = self.upsert_view(view, report).await;
        report.views.record(ok);
        if !ok {
            return;
        }
        for table_id in &view.tables_used {
            let linked = self.create_edge(&Edge::uses_table(&view.id, table_id)).await;
            if !linked {
                debug!(view = %view.id, table = %table_id, "view references a table that is not loaded");
            }
            report.view_tables.record(linked);
        }
    }

    /// `REFERENCES_COLUMN` from a view to a column, both already stored.
    pub async fn link_view_column(&self, view_id: &str, column_id: &str) -> bool {
        self.create_edge(&Edge::references_column(view_id, column_id))
            .await
    }

    /// Embed up to `limit` nodes of `kind` that have no embedding yet.
    pub async fn embed_pending(&self, kind: NodeKind, limit: usize) -> Tally {
        let mut tally = Tally::default();
        let ids = match self.store.missing_embeddings(kind, limit).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(%kind, error = %e, "cannot list nodes without embeddings");
                return tally;
            }
        };

        for id in ids {
            let text = match self.embedding_text(kind, &id).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%kind, id = %id, error = %e, "cannot load node");
                    continue;
                }
            };
            tally.attempted += 1;
            let Some(vector) = self.embedder.embed(&text).await else {
                continue;
            };
            let hash = self.embedder.hash(&text);
            match self.store.set_embedding(kind, &id, &vector, &hash).await {
                Ok(()) => tally.succeeded += 1,
                Err(e) => warn!(%kind, id = %id, error = %e, "failed to store embedding"),
            }
        }
        tally
    }

    async fn embedding_text(&self, kind: NodeKind, id: &str) -> crate::error::Result<Option<String>> {
        Ok(match kind {
            NodeKind::Table => self.store.get_table(id).await?.map(|t| table_embedding_text(&t)),
            NodeKind::Column => self
                .store
                .get_column(id)
                .await?
                .map(|c| column_embedding_text(&c)),
            NodeKind::View => self
                .store
                .get_view(id)
                .await?
                .and_then(|v| view_embedding_text(&v)),
        })
    }
}

fn note_embedding(report: &mut LoadReport, attached: &Attached, has_text: bool) {
    if !has_text {
        return;
    }
    report.embeddings.record(attached.embedding.is_some() && !attached.stale);
    if attached.reused {
        report.embeddings_reused += 1;
    }
}
