//! Load commands: module files, view files, and single views.
//!
//! `load` is partial-success: files that are missing or unparseable are
//! skipped and the rest still land. `load-views` treats a missing file or
//! invalid top-level JSON as fatal.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::graph::{GraphBuilder, LoadReport};
use crate::models::ViewNode;
use crate::parse::{parse_view, IngestContext};
use crate::resolve::{resolve, ParsedSchema};

/// Create the database and its schema.
pub async fn run_init(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    println!("Graph database initialized at {}", config.db.path.display());
    if !crate::store::GraphStore::vector_capable(&store) {
        println!("  vector indexes: unavailable (brute-force similarity search)");
    } else {
        println!("  vector indexes: enabled");
    }
    Ok(())
}

/// Every `*.json` directly under `dir`, sorted for a stable load order.
pub fn discover_module_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")))
        .collect();
    files.sort();
    files
}

/// Parse and resolve module files (and optionally a views file) into one run.
pub fn parse_inputs(files: &[PathBuf], views: Option<&Path>) -> Result<ParsedSchema> {
    let mut ctx = IngestContext::new();
    ctx.parse_files(files);
    if let Some(path) = views {
        read_views(&mut ctx, path)?;
    }
    Ok(resolve(ctx))
}

fn read_views(ctx: &mut IngestContext, path: &Path) -> Result<usize> {
    if !path.exists() {
        bail!("Views file not found: {}", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read views file: {}", path.display()))?;
    let added = ctx
        .parse_views(&content, &path.display().to_string())
        .with_context(|| format!("Invalid JSON in views file: {}", path.display()))?;
    Ok(added)
}

/// CLI entry point for `load`.
pub async fn run_load(config: &Config, files: &[PathBuf], views: Option<&Path>) -> Result<()> {
    let files = if files.is_empty() {
        let dir = &config.ingest.data_dir;
        if !dir.is_dir() {
            bail!("Data directory not found: {}", dir.display());
        }
        let found = discover_module_files(dir);
        info!(dir = %dir.display(), files = found.len(), "discovered module files");
        found
    } else {
        files.to_vec()
    };
    if files.is_empty() && views.is_none() {
        bail!("No module files to load");
    }

    let parsed = parse_inputs(&files, views)?;
    let (store, embedder) = db::open_graph(config).await?;
    let report = GraphBuilder::new(&store, &embedder).persist(&parsed).await;

    println!("load");
    println!(
        "  files:         {} parsed, {} skipped",
        parsed.files_parsed, parsed.files_skipped
    );
    if !parsed.violations.is_empty() {
        println!("  skipped records: {}", parsed.violations.len());
    }
    print_report(&report);
    if parsed.dropped_facts > 0 {
        println!(
            "  foreign keys to unloaded tables: {} (dropped)",
            parsed.dropped_facts
        );
    }
    Ok(())
}

/// CLI entry point for `load-views`.
pub async fn run_load_views(config: &Config, path: &Path) -> Result<()> {
    let mut ctx = IngestContext::new();
    read_views(&mut ctx, path)?;
    let parsed = resolve(ctx);

    let (store, embedder) = db::open_graph(config).await?;
    let report = GraphBuilder::new(&store, &embedder).persist(&parsed).await;

    println!("load-views");
    if !parsed.violations.is_empty() {
        println!("  skipped records: {}", parsed.violations.len());
    }
    println!("  views:         {}", report.views);
    println!("  view tables:   {}", report.view_tables);
    println!("  embeddings:    {}", report.embeddings);
    Ok(())
}

/// Fields for `view add`.
#[derive(Debug, Clone)]
pub struct NewView {
    pub id: String,
    pub name: String,
    pub module: Option<String>,
    pub submodule: Option<String>,
    pub description: Option<String>,
    pub sql_query: String,
    pub tables_used: Vec<String>,
}

impl NewView {
    fn into_view(self) -> Result<ViewNode> {
        let record = serde_json::json!({
            "id": self.id,
            "name": self.name,
            "module": self.module,
            "submodule": self.submodule,
            "description": self.description,
            "sql_query": self.sql_query,
            "tables_used": self.tables_used,
        });
        Ok(parse_view(&record, "Unknown", "Unknown")?)
    }
}

/// CLI entry point for `view add`.
pub async fn run_view_add(config: &Config, view: NewView) -> Result<()> {
    let view = view.into_view()?;
    let (store, embedder) = db::open_graph(config).await?;
    let report = GraphBuilder::new(&store, &embedder).add_view(&view).await;

    if report.views.succeeded == 0 {
        bail!("Failed to add view {}", view.id);
    }
    println!("Added view {} ({})", view.name, view.id);
    println!(
        "  linked tables: {} of {}",
        report.view_tables.succeeded, report.view_tables.attempted
    );
    if report.view_tables.failed() > 0 {
        println!("  (tables not in the graph are skipped)");
    }
    println!(
        "  embedding:     {}",
        if report.embeddings.succeeded > 0 { "yes" } else { "no" }
    );
    Ok(())
}

fn print_report(report: &LoadReport) {
    println!("  tables:        {}", report.tables);
    println!("  columns:       {}", report.columns);
    println!("  column refs:   {}", report.column_references);
    println!("  relationships: {}", report.relationships);
    if report.views.attempted > 0 {
        println!("  views:         {}", report.views);
        println!("  view tables:   {}", report.view_tables);
    }
    println!(
        "  embeddings:    {} ({} reused)",
        report.embeddings, report.embeddings_reused
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discovers_top_level_json_files_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.json"), "[]").unwrap();
        std::fs::write(dir.path().join("a.JSON"), "[]").unwrap();
        std::fs::write(dir.path().join("nested/c.json"), "[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = discover_module_files(dir.path());
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.JSON", "b.json"]);
    }

    #[test]
    fn missing_views_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = parse_inputs(&[], Some(&dir.path().join("views.json"))).unwrap_err();
        assert!(err.to_string().contains("Views file not found"));
    }

    #[test]
    fn invalid_views_json_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("views.json");
        std::fs::write(&path, "{\"not\": \"a list\"}").unwrap();
        assert!(parse_inputs(&[], Some(&path)).is_err());
    }

    #[test]
    fn new_view_validates_like_a_file_record() {
        let view = NewView {
            id: "V_ORDERS".into(),
            name: "Orders".into(),
            module: None,
            submodule: Some("Receivables".into()),
            description: None,
            sql_query: "select * from orders".into(),
            tables_used: vec!["ORDERS".into()],
        };
        let node = view.into_view().unwrap();
        assert_eq!(node.id, "v_orders");
        assert_eq!(node.module, "Unknown");
        assert_eq!(node.submodule, "Receivables");

        let empty = NewView {
            id: "v".into(),
            name: "V".into(),
            module: None,
            submodule: None,
            description: None,
            sql_query: String::new(),
            tables_used: vec![],
        };
        assert!(empty.into_view().is_err());
    }
}
