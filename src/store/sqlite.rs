//! SQLite-backed [`GraphStore`].
//!
//! Each node label is a table keyed by a unique `id` index; edges share one
//! table keyed by `(kind, endpoints, foreign_key_column)`. Nested structures
//! (details, primary key, column and index lists, a view's tables) are stored
//! as JSON text. Embeddings are little-endian `f32` BLOBs.
//!
//! Vector indexes are sqlite-vec `vec0` virtual tables, one per label, kept
//! in step with the node tables on every write. Whether they can exist at all
//! is decided once in [`SqliteGraphStore::open`] by probing `vec_version()`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{
    parse_version, sort_columns, ColumnDetails, GraphStats, GraphStore, MIN_VECTOR_VERSION,
};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{ColumnNode, Edge, NodeKind, TableNode, TableReference, ViewNode};

pub struct SqliteGraphStore {
    pool: SqlitePool,
    vector_capable: bool,
}

impl SqliteGraphStore {
    /// Wrap a pool and probe it for a usable sqlite-vec.
    pub async fn open(pool: SqlitePool) -> Self {
        let vector_capable = detect_vector_support(&pool).await;
        Self {
            pool,
            vector_capable,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn sync_vector_index(&self, kind: NodeKind, id: &str, embedding: Option<&[f32]>) {
        if !self.vector_capable {
            return;
        }
        match self.vector_index_exists(kind).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(index = kind.index_name(), error = %e, "cannot check vector index");
                return;
            }
        }

        let index = kind.index_name();
        if let Err(e) = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", index))
            .bind(id)
            .execute(&self.pool)
            .await
        {
            warn!(index, id, error = %e, "failed to clear vector index entry");
            return;
        }
        if let Some(vector) = embedding {
            if let Err(e) = sqlx::query(&format!("INSERT INTO {} (id, embedding) VALUES (?, ?)", index))
                .bind(id)
                .bind(vec_to_blob(vector))
                .execute(&self.pool)
                .await
            {
                warn!(index, id, error = %e, "failed to index embedding");
            }
        }
    }
}

async fn detect_vector_support(pool: &SqlitePool) -> bool {
    let version: std::result::Result<String, sqlx::Error> =
        sqlx::query_scalar("SELECT vec_version()").fetch_one(pool).await;
    match version {
        Ok(raw) => match parse_version(&raw) {
            Some(v) if v >= MIN_VECTOR_VERSION => {
                info!(version = %raw, "vector index support available");
                true
            }
            _ => {
                warn!(version = %raw, "sqlite-vec too old for vector indexes; using brute-force search");
                false
            }
        },
        Err(e) => {
            debug!(error = %e, "vec_version() unavailable");
            false
        }
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

fn ts(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

fn table_from_row(row: &SqliteRow) -> Result<TableNode> {
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(TableNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        module: row.try_get("module")?,
        submodule: row.try_get("submodule")?,
        description: row.try_get("description")?,
        details: from_json(row.try_get("details_json")?)?.unwrap_or_default(),
        primary_key: from_json(row.try_get("primary_key_json")?)?,
        columns: from_json(row.try_get("columns_json")?)?.unwrap_or_default(),
        indexes: from_json(row.try_get("indexes_json")?)?.unwrap_or_default(),
        embedding: embedding.map(|b| blob_to_vec(&b)),
        created_at: ts(row.try_get("created_at")?),
        updated_at: ts(row.try_get("updated_at")?),
    })
}

fn column_from_row(row: &SqliteRow) -> Result<ColumnNode> {
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(ColumnNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        datatype: row.try_get("datatype")?,
        table_id: row.try_get("table_id")?,
        description: row.try_get("description")?,
        length: row.try_get("length")?,
        precision: row.try_get("precision")?,
        is_nullable: row.try_get("is_nullable")?,
        is_primary_key: row.try_get("is_primary_key")?,
        is_foreign_key: row.try_get("is_foreign_key")?,
        references_column: row.try_get("references_column")?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        created_at: ts(row.try_get("created_at")?),
        updated_at: ts(row.try_get("updated_at")?),
    })
}

fn view_from_row(row: &SqliteRow) -> Result<ViewNode> {
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(ViewNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        module: row.try_get("module")?,
        submodule: row.try_get("submodule")?,
        description: row.try_get("description")?,
        sql_query: row.try_get("sql_query")?,
        tables_used: from_json(row.try_get("tables_used_json")?)?.unwrap_or_default(),
        embedding: embedding.map(|b| blob_to_vec(&b)),
        created_at: ts(row.try_get("created_at")?),
        updated_at: ts(row.try_get("updated_at")?),
    })
}

const COLUMN_FIELDS: &str = "id, name, datatype, table_id, description, length, precision, \
     is_nullable, is_primary_key, is_foreign_key, references_column, embedding, created_at, updated_at";

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn initialize(&self, dims: usize) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS table_nodes (
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                module TEXT NOT NULL,
                submodule TEXT NOT NULL,
                description TEXT,
                details_json TEXT,
                primary_key_json TEXT,
                columns_json TEXT,
                indexes_json TEXT,
                embedding BLOB,
                embedding_hash TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS column_nodes (
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                datatype TEXT NOT NULL,
                table_id TEXT NOT NULL,
                description TEXT,
                length TEXT,
                precision TEXT,
                is_nullable INTEGER NOT NULL,
                is_primary_key INTEGER NOT NULL,
                is_foreign_key INTEGER NOT NULL,
                references_column TEXT,
                embedding BLOB,
                embedding_hash TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS view_nodes (
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                module TEXT NOT NULL,
                submodule TEXT NOT NULL,
                description TEXT,
                sql_query TEXT NOT NULL,
                tables_used_json TEXT NOT NULL,
                embedding BLOB,
                embedding_hash TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edges (
                kind TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                foreign_key_column TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Uniqueness constraints
        for kind in NodeKind::ALL {
            let table = kind.table_name();
            sqlx::query(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {table}_id_unique ON {table}(id)"
            ))
            .execute(&self.pool)
            .await?;
        }
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS edges_identity ON edges(kind, source_kind, source_id, target_kind, target_id, foreign_key_column)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(kind, target_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_column_nodes_table ON column_nodes(table_id)")
            .execute(&self.pool)
            .await?;

        if !self.vector_capable {
            warn!("vector indexes unavailable; similarity search will scan stored embeddings");
            return Ok(());
        }

        for kind in NodeKind::ALL {
            let index = kind.index_name();
            let result = sqlx::query(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {index} USING vec0(id TEXT PRIMARY KEY, embedding float[{dims}] distance_metric=cosine)"
            ))
            .execute(&self.pool)
            .await;
            match result {
                Ok(_) => debug!(index, dims, "vector index ready"),
                Err(e) => warn!(index, error = %e, "could not create vector index"),
            }
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
        let now = now.timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO table_nodes (id, name, module, submodule, description, details_json,
                                     primary_key_json, columns_json, indexes_json,
                                     embedding, embedding_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                module = excluded.module,
                submodule = excluded.submodule,
                description = excluded.description,
                details_json = excluded.details_json,
                primary_key_json = excluded.primary_key_json,
                columns_json = excluded.columns_json,
                indexes_json = excluded.indexes_json,
                embedding = excluded.embedding,
                embedding_hash = excluded.embedding_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&table.id)
        .bind(&table.name)
        .bind(&table.module)
        .bind(&table.submodule)
        .bind(&table.description)
        .bind(serde_json::to_string(&table.details)?)
        .bind(
            table
                .primary_key
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&table.columns)?)
        .bind(serde_json::to_string(&table.indexes)?)
        .bind(table.embedding.as_deref().map(vec_to_blob))
        .bind(embedding_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.sync_vector_index(NodeKind::Table, &table.id, table.embedding.as_deref())
            .await;
        Ok(())
    }

    async fn upsert_column(
        &self,
        column: &ColumnNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now = now.timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO column_nodes (id, name, datatype, table_id, description, length, precision,
                                      is_nullable, is_primary_key, is_foreign_key, references_column,
                                      embedding, embedding_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                datatype = excluded.datatype,
                table_id = excluded.table_id,
                description = excluded.description,
                length = excluded.length,
                precision = excluded.precision,
                is_nullable = excluded.is_nullable,
                is_primary_key = excluded.is_primary_key,
                is_foreign_key = excluded.is_foreign_key,
                references_column = excluded.references_column,
                embedding = excluded.embedding,
                embedding_hash = excluded.embedding_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&column.id)
        .bind(&column.name)
        .bind(&column.datatype)
        .bind(&column.table_id)
        .bind(&column.description)
        .bind(&column.length)
        .bind(&column.precision)
        .bind(column.is_nullable)
        .bind(column.is_primary_key)
        .bind(column.is_foreign_key)
        .bind(&column.references_column)
        .bind(column.embedding.as_deref().map(vec_to_blob))
        .bind(embedding_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.sync_vector_index(NodeKind::Column, &column.id, column.embedding.as_deref())
            .await;
        Ok(())
    }

    async fn upsert_view(
        &self,
        view: &ViewNode,
        embedding_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now = now.timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO view_nodes (id, name, module, submodule, description, sql_query,
                                    tables_used_json, embedding, embedding_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                module = excluded.module,
                submodule = excluded.submodule,
                description = excluded.description,
                sql_query = excluded.sql_query,
                tables_used_json = excluded.tables_used_json,
                embedding = excluded.embedding,
                embedding_hash = excluded.embedding_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&view.id)
        .bind(&view.name)
        .bind(&view.module)
        .bind(&view.submodule)
        .bind(&view.description)
        .bind(&view.sql_query)
        .bind(serde_json::to_string(&view.tables_used)?)
        .bind(view.embedding.as_deref().map(vec_to_blob))
        .bind(embedding_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.sync_vector_index(NodeKind::View, &view.id, view.embedding.as_deref())
            .await;
        Ok(())
    }

    async fn stored_embedding(
        &self,
        kind: NodeKind,
        id: &str,
    ) -> Result<Option<(Vec<f32>, String)>> {
        let row: Option<(Option<Vec<u8>>, Option<String>)> = sqlx::query_as(&format!(
            "SELECT embedding, embedding_hash FROM {} WHERE id = ?",
            kind.table_name()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((Some(blob), Some(hash))) => Some((blob_to_vec(&blob), hash)),
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
        sqlx::query(&format!(
            "UPDATE {} SET embedding = ?, embedding_hash = ? WHERE id = ?",
            kind.table_name()
        ))
        .bind(vec_to_blob(embedding))
        .bind(embedding_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.sync_vector_index(kind, id, Some(embedding)).await;
        Ok(())
    }

    async fn missing_embeddings(&self, kind: NodeKind, limit: usize) -> Result<Vec<String>> {
        // Views without a description have nothing to embed.
        let embeddable = match kind {
            NodeKind::View => " AND TRIM(COALESCE(description, '')) != ''",
            NodeKind::Table | NodeKind::Column => "",
        };
        let ids: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE embedding IS NULL{} ORDER BY created_at ASC, id ASC LIMIT ?",
            kind.table_name(),
            embeddable
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn node_exists(&self, kind: NodeKind, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE id = ?",
            kind.table_name()
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_edge(&self, edge: &Edge) -> Result<bool> {
        if !self.node_exists(edge.source_kind, &edge.source_id).await?
            || !self.node_exists(edge.target_kind, &edge.target_id).await?
        {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO edges (kind, source_kind, source_id, target_kind, target_id,
                               foreign_key_column, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(kind, source_kind, source_id, target_kind, target_id, foreign_key_column)
            DO NOTHING
            "#,
        )
        .bind(edge.kind.label())
        .bind(edge.source_kind.label())
        .bind(&edge.source_id)
        .bind(edge.target_kind.label())
        .bind(&edge.target_id)
        .bind(edge.foreign_key_column.as_deref().unwrap_or(""))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    async fn vector_index_exists(&self, kind: NodeKind) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(kind.index_name())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn vector_index_query(
        &self,
        kind: NodeKind,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        if !self.vector_capable {
            return Err(Error::CapabilityUnsupported(
                "sqlite-vec is not loaded".to_string(),
            ));
        }
        let rows: Vec<(String, f64)> = sqlx::query_as(&format!(
            "SELECT id, distance FROM {} WHERE embedding MATCH ? AND k = ? ORDER BY distance",
            kind.index_name()
        ))
        .bind(vec_to_blob(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, distance)| (id, (1.0 - distance) as f32))
            .collect())
    }

    async fn embedded_nodes(
        &self,
        kind: NodeKind,
        table_scope: Option<&[String]>,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let rows: Vec<(String, Vec<u8>)> = match (kind, table_scope) {
            (NodeKind::Column, Some(scope)) => {
                if scope.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; scope.len()].join(", ");
                let sql = format!(
                    "SELECT id, embedding FROM column_nodes WHERE embedding IS NOT NULL AND table_id IN ({}) ORDER BY id",
                    placeholders
                );
                let mut query = sqlx::query_as::<_, (String, Vec<u8>)>(&sql);
                for table_id in scope {
                    query = query.bind(table_id);
                }
                query.fetch_all(&self.pool).await?
            }
            (_, Some(_)) => return Ok(Vec::new()),
            (_, None) => {
                sqlx::query_as(&format!(
                    "SELECT id, embedding FROM {} WHERE embedding IS NOT NULL ORDER BY id",
                    kind.table_name()
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(id, blob)| (id, blob_to_vec(&blob)))
            .collect())
    }

    async fn get_table(&self, id: &str) -> Result<Option<TableNode>> {
        let row = sqlx::query("SELECT * FROM table_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(table_from_row).transpose()
    }

    async fn get_column(&self, id: &str) -> Result<Option<ColumnNode>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM column_nodes WHERE id = ?",
            COLUMN_FIELDS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(column_from_row).transpose()
    }

    async fn get_view(&self, id: &str) -> Result<Option<ViewNode>> {
        let row = sqlx::query("SELECT * FROM view_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(view_from_row).transpose()
    }

    async fn columns_for_table(&self, table_id: &str) -> Result<Vec<ColumnNode>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.datatype, c.table_id, c.description, c.length, c.precision,
                   c.is_nullable, c.is_primary_key, c.is_foreign_key, c.references_column,
                   c.embedding, c.created_at, c.updated_at
            FROM edges e
            JOIN column_nodes c ON c.id = e.target_id
            WHERE e.kind = 'HAS_COLUMN' AND e.source_id = ?
            "#,
        )
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = rows
            .iter()
            .map(column_from_row)
            .collect::<Result<Vec<_>>>()?;
        sort_columns(&mut columns);
        Ok(columns)
    }

    async fn column_details(&self, id: &str) -> Result<Option<ColumnDetails>> {
        let Some(column) = self.get_column(id).await? else {
            return Ok(None);
        };
        let referenced: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT t.name, t.table_id
            FROM edges e
            JOIN column_nodes t ON t.id = e.target_id
            WHERE e.kind = 'REFERENCES' AND e.source_kind = 'COLUMN' AND e.source_id = ?
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let (referenced_column_name, referenced_table_id) = match referenced {
            Some((name, table_id)) => (Some(name), Some(table_id)),
            None => (None, None),
        };
        Ok(Some(ColumnDetails {
            column,
            referenced_column_name,
            referenced_table_id,
        }))
    }

    async fn table_references(&self, table_id: &str) -> Result<Vec<TableReference>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT source_id, target_id, foreign_key_column
            FROM edges
            WHERE kind = 'REFERENCES' AND source_kind = 'TABLE'
              AND (source_id = ? OR target_id = ?)
            ORDER BY created_at ASC, source_id, target_id, foreign_key_column
            "#,
        )
        .bind(table_id)
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(source_id, target_id, foreign_key_column)| TableReference {
                source_id,
                target_id,
                foreign_key_column,
            })
            .collect())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let pool = &self.pool;
        let mut stats = GraphStats {
            tables: count(pool, "SELECT COUNT(*) FROM table_nodes").await?,
            columns: count(pool, "SELECT COUNT(*) FROM column_nodes").await?,
            views: count(pool, "SELECT COUNT(*) FROM view_nodes").await?,
            primary_key_columns: count(
                pool,
                "SELECT COUNT(*) FROM column_nodes WHERE is_primary_key = 1",
            )
            .await?,
            foreign_key_columns: count(
                pool,
                "SELECT COUNT(*) FROM column_nodes WHERE is_foreign_key = 1",
            )
            .await?,
            vector_capable: self.vector_capable,
            ..GraphStats::default()
        };

        let edges: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM edges GROUP BY kind ORDER BY kind")
                .fetch_all(&self.pool)
                .await?;
        stats.edges = edges.into_iter().collect::<BTreeMap<_, _>>();

        let modules: Vec<(String, i64)> = sqlx::query_as(
            "SELECT module, COUNT(*) FROM table_nodes GROUP BY module ORDER BY module",
        )
        .fetch_all(&self.pool)
        .await?;
        stats.tables_by_module = modules.into_iter().collect();

        for kind in NodeKind::ALL {
            let embedded: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE embedding IS NOT NULL",
                kind.table_name()
            ))
            .fetch_one(&self.pool)
            .await?;
            stats.embedded.insert(kind.label().to_string(), embedded);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TableDetails;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    async fn temp_store(dir: &TempDir) -> SqliteGraphStore {
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("graph.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        let store = SqliteGraphStore::open(pool).await;
        store.initialize(3).await.unwrap();
        store
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn table(description: &str) -> TableNode {
        TableNode {
            id: "orders".into(),
            name: "ORDERS".into(),
            module: "Financials".into(),
            submodule: "Receivables".into(),
            description: Some(description.into()),
            details: TableDetails::default(),
            primary_key: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            embedding: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn column(datatype: &str) -> ColumnNode {
        ColumnNode {
            id: "orders_order_id".into(),
            name: "ORDER_ID".into(),
            datatype: datatype.into(),
            table_id: "orders".into(),
            description: None,
            length: None,
            precision: None,
            is_nullable: false,
            is_primary_key: true,
            is_foreign_key: false,
            references_column: None,
            embedding: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn view(id: &str, description: Option<&str>) -> ViewNode {
        ViewNode {
            id: id.into(),
            name: id.to_uppercase(),
            module: "Financials".into(),
            submodule: "Unknown".into(),
            description: description.map(str::to_string),
            sql_query: "SELECT 1 FROM orders".into(),
            tables_used: vec!["orders".into()],
            embedding: None,
            created_at: None,
            updated_at: None,
        }
    }

    async fn rows(store: &SqliteGraphStore, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upserting_twice_keeps_one_row_and_the_first_created_at() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir).await;

        store.upsert_table(&table("first"), None, at(1_000)).await.unwrap();
        store.upsert_column(&column("NUMBER"), None, at(1_000)).await.unwrap();
        assert!(store
            .create_edge(&Edge::has_column("orders", "orders_order_id"))
            .await
            .unwrap());

        store.upsert_table(&table("second"), None, at(5_000)).await.unwrap();
        store.upsert_column(&column("VARCHAR2"), None, at(5_000)).await.unwrap();
        assert!(store
            .create_edge(&Edge::has_column("orders", "orders_order_id"))
            .await
            .unwrap());

        assert_eq!(rows(&store, "table_nodes").await, 1);
        assert_eq!(rows(&store, "column_nodes").await, 1);
        assert_eq!(rows(&store, "edges").await, 1);

        let stored = store.get_table("orders").await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("second"));
        assert_eq!(stored.created_at, Some(at(1_000)));
        assert_eq!(stored.updated_at, Some(at(5_000)));

        let stored = store.get_column("orders_order_id").await.unwrap().unwrap();
        assert_eq!(stored.datatype, "VARCHAR2");
        assert_eq!(stored.created_at, Some(at(1_000)));
        assert_eq!(stored.updated_at, Some(at(5_000)));
    }

    #[tokio::test]
    async fn edges_need_both_endpoints() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir).await;
        store.upsert_column(&column("NUMBER"), None, at(1_000)).await.unwrap();

        let created = store
            .create_edge(&Edge::has_column("orders", "orders_order_id"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(rows(&store, "edges").await, 0);
    }

    #[tokio::test]
    async fn views_without_description_are_not_pending() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir).await;
        store.upsert_view(&view("v_blank", None), None, at(1_000)).await.unwrap();
        store.upsert_view(&view("v_empty", Some("  ")), None, at(2_000)).await.unwrap();
        store
            .upsert_view(&view("v_orders", Some("Open orders")), None, at(3_000))
            .await
            .unwrap();

        assert_eq!(
            store.missing_embeddings(NodeKind::View, 1).await.unwrap(),
            vec!["v_orders".to_string()]
        );
    }
}
