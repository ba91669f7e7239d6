//! Query orchestration: ranked retrieval plus bounded graph enrichment.
//!
//! For a table query the top [`ENRICHED_RESULTS`] hits get their
//! neighbourhood over `REFERENCES` edges (1 to [`MAX_HOPS`] hops, either
//! direction, at most [`MAX_RELATED_TABLES`] tables), and only the first hit
//! gets its full definition and live column list. Enrichment never reorders
//! the retrieval ranking.

use anyhow::Result;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::models::{ColumnNode, NodeKind, TableNode, TableReference};
use crate::search::{HitDetail, Retriever, SearchHit};
use crate::store::GraphStore;

pub const ENRICHED_RESULTS: usize = 3;
pub const MAX_RELATED_TABLES: usize = 20;
pub const MAX_HOPS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NodeType {
    Table,
    Column,
    View,
    /// Tables and columns.
    Both,
}

/// A table reachable from a hit, with the reference edges walked to get there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedTable {
    pub id: String,
    pub name: String,
    pub module: String,
    pub submodule: String,
    pub description: Option<String>,
    pub hops: usize,
    pub path: Vec<TableReference>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableResult {
    #[serde(flatten)]
    pub hit: SearchHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_tables: Option<Vec<RelatedTable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<TableNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnNode>>,
}

/// A column hit with its key flags and, for foreign keys, the column it
/// references.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnResult {
    #[serde(flatten)]
    pub hit: SearchHit,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_column_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_table_id: Option<String>,
}

impl ColumnResult {
    fn bare(hit: SearchHit) -> Self {
        Self {
            hit,
            is_primary_key: false,
            is_foreign_key: false,
            references_column: None,
            referenced_column_name: None,
            referenced_table_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub top_k: usize,
    pub include_related: bool,
}

pub struct Orchestrator<'a> {
    store: &'a dyn GraphStore,
    retriever: Retriever<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a dyn GraphStore, embedder: &'a Embedder) -> Self {
        Self {
            store,
            retriever: Retriever::new(store, embedder),
        }
    }

    pub fn retriever(&self) -> &Retriever<'a> {
        &self.retriever
    }

    pub async fn query_tables(&self, query: &str, options: QueryOptions) -> Vec<TableResult> {
        let hits = self
            .retriever
            .search(query, NodeKind::Table, options.top_k)
            .await;

        let mut results = Vec::with_capacity(hits.len());
        for (rank, hit) in hits.into_iter().enumerate() {
            let mut result = TableResult {
                hit,
                related_tables: None,
                definition: None,
                columns: None,
            };

            if options.include_related && rank < ENRICHED_RESULTS {
                match self.related_tables(&result.hit.id).await {
                    Ok(related) => result.related_tables = Some(related),
                    Err(e) => warn!(table = %result.hit.id, error = %e, "could not load related tables"),
                }
            }

            if rank == 0 {
                match self.store.get_table(&result.hit.id).await {
                    Ok(definition) => result.definition = definition,
                    Err(e) => warn!(table = %result.hit.id, error = %e, "could not load table definition"),
                }
                match self.store.columns_for_table(&result.hit.id).await {
                    Ok(columns) => result.columns = Some(columns),
                    Err(e) => warn!(table = %result.hit.id, error = %e, "could not load columns"),
                }
            }

            results.push(result);
        }
        results
    }

    /// Column search, optionally scoped to some tables, with every hit
    /// joined to its stored details.
    pub async fn query_columns(
        &self,
        query: &str,
        table_scope: Option<&[String]>,
        limit: usize,
    ) -> Vec<ColumnResult> {
        let hits = match table_scope {
            Some(tables) => self.retriever.search_columns_in(query, tables, limit).await,
            None => self.retriever.search(query, NodeKind::Column, limit).await,
        };

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let details = match self.store.column_details(&hit.id).await {
                Ok(details) => details,
                Err(e) => {
                    warn!(column = %hit.id, error = %e, "could not load column details");
                    None
                }
            };
            let mut result = ColumnResult::bare(hit);
            if let Some(details) = details {
                result.is_primary_key = details.column.is_primary_key;
                result.is_foreign_key = details.column.is_foreign_key;
                result.references_column = details.column.references_column;
                result.referenced_column_name = details.referenced_column_name;
                result.referenced_table_id = details.referenced_table_id;
            }
            results.push(result);
        }
        results
    }

    /// Breadth-first walk over table `REFERENCES` edges, ignoring direction.
    /// Each table appears once, at its shortest distance.
    pub async fn related_tables(&self, table_id: &str) -> crate::error::Result<Vec<RelatedTable>> {
        let mut visited: HashSet<String> = HashSet::from([table_id.to_string()]);
        let mut queue: VecDeque<(String, Vec<TableReference>)> =
            VecDeque::from([(table_id.to_string(), Vec::new())]);
        let mut related = Vec::new();

        while let Some((current, path)) = queue.pop_front() {
            if path.len() >= MAX_HOPS {
                continue;
            }
            for reference in self.store.table_references(&current).await? {
                let other = if reference.source_id == current {
                    &reference.target_id
                } else {
                    &reference.source_id
                };
                if !visited.insert(other.clone()) {
                    continue;
                }
                let Some(table) = self.store.get_table(other).await? else {
                    continue;
                };

                let mut next_path = path.clone();
                next_path.push(reference.clone());
                related.push(RelatedTable {
                    id: table.id.clone(),
                    name: table.name,
                    module: table.module,
                    submodule: table.submodule,
                    description: table.description,
                    hops: next_path.len(),
                    path: next_path.clone(),
                });
                if related.len() >= MAX_RELATED_TABLES {
                    return Ok(related);
                }
                queue.push_back((table.id, next_path));
            }
        }
        Ok(related)
    }
}

#[derive(Debug, Serialize)]
struct QueryOutput<'q> {
    query: &'q str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tables: Option<Vec<TableResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<Vec<ColumnResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    views: Option<Vec<SearchHit>>,
}

/// CLI entry point for `query`.
pub async fn run_query(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    no_related: bool,
    format: OutputFormat,
    node_type: NodeType,
) -> Result<()> {
    let (store, embedder) = db::open_graph(config).await?;
    let orchestrator = Orchestrator::new(&store, &embedder);
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let mut output = QueryOutput {
        query,
        tables: None,
        columns: None,
        views: None,
    };
    if matches!(node_type, NodeType::Table | NodeType::Both) {
        let options = QueryOptions {
            top_k,
            include_related: !no_related,
        };
        output.tables = Some(orchestrator.query_tables(query, options).await);
    }
    if matches!(node_type, NodeType::Column | NodeType::Both) {
        output.columns = Some(orchestrator.query_columns(query, None, top_k).await);
    }
    if node_type == NodeType::View {
        output.views = Some(
            orchestrator
                .retriever()
                .search(query, NodeKind::View, top_k)
                .await,
        );
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            if let Some(tables) = &output.tables {
                print_tables(query, tables);
            }
            if let Some(columns) = &output.columns {
                print_columns(query, columns);
            }
            if let Some(views) = &output.views {
                print_hits("Views", query, views);
            }
        }
    }
    Ok(())
}

/// CLI entry point for `column search`.
pub async fn run_column_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    table_id: Option<&str>,
) -> Result<()> {
    let (store, embedder) = db::open_graph(config).await?;
    let orchestrator = Orchestrator::new(&store, &embedder);
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let scope = table_id.map(|t| vec![t.to_lowercase()]);
    let columns = orchestrator
        .query_columns(query, scope.as_deref(), top_k)
        .await;
    print_columns(query, &columns);
    Ok(())
}

/// CLI entry point for `view search`.
pub async fn run_view_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let (store, embedder) = db::open_graph(config).await?;
    let retriever = Retriever::new(&store, &embedder);
    let hits = retriever
        .search(query, NodeKind::View, top_k.unwrap_or(config.retrieval.top_k))
        .await;
    print_hits("Views", query, &hits);
    Ok(())
}

fn print_tables(query: &str, tables: &[TableResult]) {
    if tables.is_empty() {
        println!("No tables found for \"{}\".", query);
        return;
    }
    println!("Tables for \"{}\":", query);
    for (i, result) in tables.iter().enumerate() {
        print_hit(i + 1, &result.hit);
        if let Some(related) = &result.related_tables {
            if !related.is_empty() {
                println!("    related:");
                for r in related {
                    let via: Vec<String> = r
                        .path
                        .iter()
                        .map(|e| format!("{} -> {} ({})", e.source_id, e.target_id, e.foreign_key_column))
                        .collect();
                    println!("      {} [{}] via {}", r.name, r.module, via.join(", "));
                }
            }
        }
        if let Some(definition) = &result.definition {
            if let Some(pk) = &definition.primary_key {
                println!("    primary key: {} ({})", pk.name, pk.columns);
            }
            if !definition.indexes.is_empty() {
                println!("    indexes: {}", definition.indexes.len());
            }
        }
        if let Some(columns) = &result.columns {
            println!("    columns ({}):", columns.len());
            for c in columns {
                let mut flags = Vec::new();
                if c.is_primary_key {
                    flags.push("PK".to_string());
                }
                if let Some(target) = c.references_column.as_deref().filter(|_| c.is_foreign_key) {
                    flags.push(format!("FK -> {}", target));
                }
                if flags.is_empty() {
                    println!("      {:<32} {}", c.name, c.datatype);
                } else {
                    println!("      {:<32} {:<14} {}", c.name, c.datatype, flags.join(", "));
                }
            }
        }
    }
}

fn print_columns(query: &str, columns: &[ColumnResult]) {
    if columns.is_empty() {
        println!("No columns found for \"{}\".", query);
        return;
    }
    println!("Columns for \"{}\":", query);
    for (i, column) in columns.iter().enumerate() {
        print_hit(i + 1, &column.hit);
        if column.is_primary_key {
            println!("    primary key");
        }
        if column.is_foreign_key {
            match (&column.referenced_table_id, &column.referenced_column_name) {
                (Some(table), Some(name)) => println!("    references {}.{}", table, name),
                _ => println!(
                    "    references {} (not in graph)",
                    column.references_column.as_deref().unwrap_or("?")
                ),
            }
        }
    }
}

pub(crate) fn print_hits(label: &str, query: &str, hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No {} found for \"{}\".", label.to_lowercase(), query);
        return;
    }
    println!("{} for \"{}\":", label, query);
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
}

fn print_hit(rank: usize, hit: &SearchHit) {
    println!();
    println!("{}. {} ({})  similarity {:.3}", rank, hit.name, hit.id, hit.similarity);
    match &hit.detail {
        HitDetail::Table { module, submodule } => println!("    {} / {}", module, submodule),
        HitDetail::Column { datatype, table_id } => println!("    {} in {}", datatype, table_id),
        HitDetail::View {
            module,
            submodule,
            sql_query,
        } => {
            println!("    {} / {}", module, submodule);
            println!("    sql: {}", sql_query.replace('\n', " "));
        }
    }
    if let Some(description) = &hit.description {
        println!("    {}", description);
    }
}
