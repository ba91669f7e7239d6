//! Embedding backfill.
//!
//! `sgraph embed pending` embeds nodes that were stored without a vector,
//! typically because the provider was down during `load`. Views without a
//! description are never pending.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::graph::{GraphBuilder, Tally};
use crate::models::NodeKind;

/// Which node labels an embedding pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmbedTarget {
    Table,
    Column,
    View,
    All,
}

impl EmbedTarget {
    pub fn kinds(self) -> Vec<NodeKind> {
        match self {
            EmbedTarget::Table => vec![NodeKind::Table],
            EmbedTarget::Column => vec![NodeKind::Column],
            EmbedTarget::View => vec![NodeKind::View],
            EmbedTarget::All => NodeKind::ALL.to_vec(),
        }
    }
}

/// Embed nodes that were stored without a vector, e.g. because the
/// provider was down during `load`.
pub async fn run_embed_pending(config: &Config, limit: Option<usize>, target: EmbedTarget) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let (store, embedder) = db::open_graph(config).await?;
    let builder = GraphBuilder::new(&store, &embedder);
    let limit = limit.unwrap_or(i64::MAX as usize);

    println!("embed pending");
    let mut total = Tally::default();
    for kind in target.kinds() {
        let tally = builder.embed_pending(kind, limit).await;
        println!("  {:<8} {}", kind.label(), tally);
        total.succeeded += tally.succeeded;
        total.attempted += tally.attempted;
    }
    if total.attempted == 0 {
        println!("  all nodes up to date");
    } else if total.failed() > 0 {
        println!("  failed: {}", total.failed());
    }
    Ok(())
}
