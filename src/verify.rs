//! View-column reconciliation.
//!
//! Takes columns extracted from view SQL, each with one or more guessed
//! column ids, and links the view to the graph column it means with a
//! `REFERENCES_COLUMN` edge. Per extracted column the stages are:
//!
//! 1. **Direct**: the first guessed id that exists and links wins.
//! 2. **Scoped search**: best column match among the view's own tables.
//! 3. **Judgment**: a [`SemanticJudge`] confirms the candidate. If the judge
//!    errors or times out, the candidate is accepted only above
//!    [`THRESHOLD_ACCEPT_SIMILARITY`].
//!
//! Anything left over is recorded as unresolved and the pass moves on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::graph::GraphBuilder;
use crate::judge::{create_judge, MatchQuestion, SemanticJudge};
use crate::models::NodeKind;
use crate::search::{HitDetail, Retriever};
use crate::store::GraphStore;

/// Similarity above which a candidate is accepted when the judge cannot
/// answer.
pub const THRESHOLD_ACCEPT_SIMILARITY: f32 = 0.85;

/// Extraction output for one view, keyed by view id in the dataset file.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedView {
    pub view_name: String,
    #[serde(default)]
    pub tables_used: Vec<String>,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub column_name: String,
    #[serde(default)]
    pub potential_column_ids: Vec<ColumnGuess>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnGuess {
    pub column_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptedBy {
    Judge,
    Threshold,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub view: String,
    pub extracted_column: String,
    pub matched_column: String,
    pub matched_column_id: String,
    pub matched_table_id: String,
    pub similarity: f32,
    pub accepted_by: AcceptedBy,
}

#[derive(Debug, Clone, Serialize)]
pub struct Unresolved {
    pub view: String,
    pub column: String,
    pub tried_ids: Vec<String>,
    pub searched_tables: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub total_views: usize,
    pub total_columns: usize,
    pub direct_matches: usize,
    pub vector_matches: usize,
    pub verified_matches: usize,
    pub threshold_matches: usize,
    pub relationships_created: usize,
    pub unresolved: Vec<Unresolved>,
    pub vector_match_details: Vec<VectorMatch>,
}

/// Terminal state of one extracted column.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Direct { column_id: String },
    Matched { column_id: String, similarity: f32, accepted_by: AcceptedBy },
    Unresolved { reason: String },
}

pub struct Verifier<'a> {
    store: &'a dyn GraphStore,
    builder: GraphBuilder<'a>,
    retriever: Retriever<'a>,
    judge: &'a dyn SemanticJudge,
    judge_timeout: Duration,
}

impl<'a> Verifier<'a> {
    pub fn new(
        store: &'a dyn GraphStore,
        builder: GraphBuilder<'a>,
        retriever: Retriever<'a>,
        judge: &'a dyn SemanticJudge,
        judge_timeout: Duration,
    ) -> Self {
        Self {
            store,
            builder,
            retriever,
            judge,
            judge_timeout,
        }
    }

    /// Reconcile every view in the dataset, one column at a time.
    pub async fn run(&self, dataset: &BTreeMap<String, ExtractedView>) -> VerifyReport {
        let mut report = VerifyReport::default();
        for (view_id, view) in dataset {
            report.total_views += 1;
            info!(view = %view.view_name, id = %view_id, columns = view.column_mappings.len(), "verifying view columns");
            let before = report.relationships_created;
            for mapping in &view.column_mappings {
                self.verify_column(view_id, view, mapping, &mut report).await;
            }
            debug!(
                view = %view.view_name,
                linked = report.relationships_created - before,
                "view done"
            );
        }
        report
    }

    async fn verify_column(
        &self,
        view_id: &str,
        view: &ExtractedView,
        mapping: &ColumnMapping,
        report: &mut VerifyReport,
    ) {
        report.total_columns += 1;
        let view_id = view_id.to_lowercase();
        let tables: Vec<String> = view.tables_used.iter().map(|t| t.to_lowercase()).collect();

        match self.resolve(&view_id, &view.view_name, &tables, mapping, report).await {
            Outcome::Direct { .. } => {
                report.direct_matches += 1;
                report.relationships_created += 1;
            }
            Outcome::Matched { accepted_by, .. } => {
                report.vector_matches += 1;
                match accepted_by {
                    AcceptedBy::Judge => report.verified_matches += 1,
                    AcceptedBy::Threshold => report.threshold_matches += 1,
                }
                report.relationships_created += 1;
            }
            Outcome::Unresolved { reason } => {
                debug!(view = %view.view_name, column = %mapping.column_name, %reason, "column unresolved");
                report.unresolved.push(Unresolved {
                    view: view.view_name.clone(),
                    column: mapping.column_name.clone(),
                    tried_ids: mapping
                        .potential_column_ids
                        .iter()
                        .map(|g| g.column_id.clone())
                        .collect(),
                    searched_tables: tables,
                    reason,
                });
            }
        }
    }

    async fn resolve(
        &self,
        view_id: &str,
        view_name: &str,
        tables: &[String],
        mapping: &ColumnMapping,
        report: &mut VerifyReport,
    ) -> Outcome {
        for guess in &mapping.potential_column_ids {
            let column_id = guess.column_id.to_lowercase();
            let exists = match self.store.node_exists(NodeKind::Column, &column_id).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(column = %column_id, error = %e, "cannot check column");
                    false
                }
            };
            if exists && self.builder.link_view_column(view_id, &column_id).await {
                return Outcome::Direct { column_id };
            }
        }

        let hits = self
            .retriever
            .search_columns_in(&mapping.column_name, tables, 1)
            .await;
        let Some(best) = hits.into_iter().next() else {
            return Outcome::Unresolved {
                reason: "no candidate in view tables".to_string(),
            };
        };

        let question = MatchQuestion {
            extracted: mapping.column_name.clone(),
            candidate: best.name.clone(),
            similarity: best.similarity,
            tables: tables.to_vec(),
        };
        let judged = match tokio::time::timeout(self.judge_timeout, self.judge.same_column(&question)).await {
            Ok(Ok(answer)) => Some(answer),
            Ok(Err(e)) => {
                debug!(error = %e, "judge unavailable, using similarity threshold");
                None
            }
            Err(_) => {
                warn!(column = %mapping.column_name, "judge timed out, using similarity threshold");
                None
            }
        };
        let accepted_by = match judged {
            Some(true) => AcceptedBy::Judge,
            Some(false) => {
                return Outcome::Unresolved {
                    reason: format!("judge rejected {}", best.name),
                }
            }
            None if threshold_accepts(best.similarity) => AcceptedBy::Threshold,
            None => {
                return Outcome::Unresolved {
                    reason: format!(
                        "{} at {:.3} is below the fallback threshold",
                        best.name, best.similarity
                    ),
                }
            }
        };

        if !self.builder.link_view_column(view_id, &best.id).await {
            return Outcome::Unresolved {
                reason: format!("could not link {} to {}", view_id, best.id),
            };
        }

        let matched_table_id = match &best.detail {
            HitDetail::Column { table_id, .. } => table_id.clone(),
            _ => String::new(),
        };
        report.vector_match_details.push(VectorMatch {
            view: view_name.to_string(),
            extracted_column: mapping.column_name.clone(),
            matched_column: best.name.clone(),
            matched_column_id: best.id.clone(),
            matched_table_id,
            similarity: best.similarity,
            accepted_by,
        });
        Outcome::Matched {
            column_id: best.id,
            similarity: best.similarity,
            accepted_by,
        }
    }
}

pub fn threshold_accepts(similarity: f32) -> bool {
    similarity > THRESHOLD_ACCEPT_SIMILARITY
}

/// Read a column-extraction dataset. A missing file or invalid JSON is fatal.
pub fn load_dataset(path: &Path) -> Result<BTreeMap<String, ExtractedView>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Dataset file not found: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in dataset {}", path.display()))
}

/// CLI entry point for `link-columns`.
pub async fn run_link_columns(config: &Config, dataset: &Path, output: Option<&Path>) -> Result<()> {
    let data = load_dataset(dataset)?;
    let (store, embedder) = db::open_graph(config).await?;
    let judge = create_judge(&config.judge)?;

    let verifier = Verifier::new(
        &store,
        GraphBuilder::new(&store, &embedder),
        Retriever::new(&store, &embedder),
        judge.as_ref(),
        Duration::from_secs(config.judge.timeout_secs),
    );
    let report = verifier.run(&data).await;

    println!("link-columns");
    println!("  views:                 {}", report.total_views);
    println!("  columns:               {}", report.total_columns);
    println!("  direct matches:        {}", report.direct_matches);
    println!(
        "  vector matches:        {} ({} judged, {} by threshold)",
        report.vector_matches, report.verified_matches, report.threshold_matches
    );
    println!("  relationships created: {}", report.relationships_created);
    if report.total_columns > 0 {
        println!(
            "  success rate:          {:.1}%",
            report.relationships_created as f64 * 100.0 / report.total_columns as f64
        );
    }

    if !report.vector_match_details.is_empty() {
        println!();
        println!("  vector matches (first 10):");
        for m in report.vector_match_details.iter().take(10) {
            println!(
                "    {}: {} -> {} ({:.3})",
                m.view, m.extracted_column, m.matched_column, m.similarity
            );
        }
    }

    if !report.unresolved.is_empty() {
        println!();
        println!("  unresolved ({}):", report.unresolved.len());
        let mut by_view: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for u in &report.unresolved {
            by_view.entry(u.view.as_str()).or_default().push(u.column.as_str());
        }
        for (view, columns) in by_view {
            println!("    {}: {}", view, columns.join(", "));
        }
    }

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!();
        println!("  report written to {}", path.display());
    }
    Ok(())
}
