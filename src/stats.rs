//! Graph statistics and health overview.
//!
//! Summarizes what is loaded: node counts, key columns, edges by type,
//! tables per module, and how much of the graph carries embeddings. Used by
//! `sgraph info` to confirm that loads and embedding passes did their job.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::NodeKind;
use crate::store::{GraphStats, GraphStore};

/// CLI entry point for `info`.
pub async fn run_info(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Schema Graph Info");
    println!("=================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!(
        "  Vector index: {}",
        if stats.vector_capable { "enabled" } else { "unavailable" }
    );
    println!();
    println!("  Tables:       {}", stats.tables);
    println!("  Columns:      {}", stats.columns);
    println!("    primary key: {}", stats.primary_key_columns);
    println!("    foreign key: {}", stats.foreign_key_columns);
    println!("  Views:        {}", stats.views);

    println!();
    println!("  Embedded:");
    for kind in NodeKind::ALL {
        let total = node_count(&stats, kind);
        let embedded = stats.embedded.get(kind.label()).copied().unwrap_or(0);
        println!(
            "    {:<8} {} / {} ({}%)",
            kind.label(),
            embedded,
            total,
            percent(embedded, total)
        );
    }

    if !stats.edges.is_empty() {
        println!();
        println!("  Edges:");
        for (label, count) in &stats.edges {
            println!("    {:<18} {:>8}", label, count);
        }
    }

    if !stats.tables_by_module.is_empty() {
        println!();
        println!("  Tables by module:");
        for (module, count) in &stats.tables_by_module {
            println!("    {:<32} {:>6}", module, count);
        }
    }
    println!();
    Ok(())
}

fn node_count(stats: &GraphStats, kind: NodeKind) -> i64 {
    match kind {
        NodeKind::Table => stats.tables,
        NodeKind::Column => stats.columns,
        NodeKind::View => stats.views,
    }
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn percent_handles_empty_graph() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
    }
}
