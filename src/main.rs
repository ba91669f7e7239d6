//! # Schema Graph CLI (`sgraph`)
//!
//! The `sgraph` binary loads schema exports into the graph, searches it, and
//! reconciles view columns against it.
//!
//! ## Usage
//!
//! ```bash
//! sgraph --config ./config/sgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sgraph init` | Create the database, constraints and vector indexes |
//! | `sgraph load` | Parse module files (and optionally views) into the graph |
//! | `sgraph load-views <file>` | Add views from a views file |
//! | `sgraph query "<text>"` | Ranked tables with related tables and columns |
//! | `sgraph column search\|list\|details` | Column lookups |
//! | `sgraph view search\|add` | View search and manual view entry |
//! | `sgraph table details <id>` | Full table definition |
//! | `sgraph link-columns <dataset>` | Link view columns to graph columns |
//! | `sgraph embed pending` | Embed nodes stored without a vector |
//! | `sgraph info` | Graph statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use schema_graph::embed_cmd::{self, EmbedTarget};
use schema_graph::ingest::{self, NewView};
use schema_graph::query::{self, NodeType, OutputFormat};
use schema_graph::{config, get, stats, verify};

/// Schema Graph: compile schema exports into a searchable property graph.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sgraph.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sgraph",
    about = "Compile database schema exports into a property graph with semantic search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sgraph.toml")]
    config: PathBuf,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the graph database.
    ///
    /// Creates the SQLite file, node tables, uniqueness constraints and,
    /// when sqlite-vec is available, one vector index per node label.
    /// Running it again is safe.
    Init,

    /// Load module files into the graph.
    ///
    /// Without `--files`, every `*.json` directly in `[ingest].data_dir` is read.
    /// Records that fail validation are skipped; the rest still load.
    Load {
        /// Module files to load instead of scanning the data directory.
        #[arg(long, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Views file to load in the same run.
        #[arg(long)]
        views: Option<PathBuf>,
    },

    /// Load views from a views file.
    LoadViews {
        /// JSON list of view records.
        file: PathBuf,
    },

    /// Ask a question about the schema.
    ///
    /// Tables are ranked by embedding similarity. The top results are
    /// expanded with tables reachable over foreign keys, and the first result
    /// also shows its definition and columns.
    Query {
        query: String,

        /// Number of results (default from `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Skip related-table expansion.
        #[arg(long)]
        no_related: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        #[arg(long, value_enum, default_value = "table")]
        node_type: NodeType,
    },

    /// Column lookups.
    Column {
        #[command(subcommand)]
        action: ColumnAction,
    },

    /// View lookups and manual view entry.
    View {
        #[command(subcommand)]
        action: ViewAction,
    },

    /// Table lookups.
    Table {
        #[command(subcommand)]
        action: TableAction,
    },

    /// Link columns extracted from view SQL to graph columns.
    ///
    /// Tries the guessed column ids first, then a similarity search scoped
    /// to the view's tables, confirmed by the configured judge.
    LinkColumns {
        /// Extraction dataset (JSON object keyed by view id).
        dataset: PathBuf,

        /// Write the full report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show graph statistics.
    Info,
}

#[derive(Subcommand)]
enum ColumnAction {
    /// Search columns by meaning.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Only search the columns of this table.
        #[arg(long)]
        table_id: Option<String>,
    },
    /// List a table's columns, primary key first.
    List { table_id: String },
    /// Show one column and the column it references.
    Details { column_id: String },
}

#[derive(Subcommand)]
enum ViewAction {
    /// Search views by meaning.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Add or update a single view.
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        submodule: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// The view's SQL text.
        #[arg(long)]
        sql: String,
        /// Comma-separated table ids the view reads.
        #[arg(long, value_delimiter = ',', required = true)]
        tables: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TableAction {
    /// Show a table's definition, references and columns.
    Details { table_id: String },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed nodes that have no embedding yet.
    Pending {
        /// Maximum nodes per label in this run.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value = "all")]
        node_type: EmbedTarget,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => ingest::run_init(&cfg).await?,
        Commands::Load { files, views } => {
            ingest::run_load(&cfg, &files, views.as_deref()).await?;
        }
        Commands::LoadViews { file } => ingest::run_load_views(&cfg, &file).await?,
        Commands::Query {
            query,
            top_k,
            no_related,
            format,
            node_type,
        } => {
            query::run_query(&cfg, &query, top_k, no_related, format, node_type).await?;
        }
        Commands::Column { action } => match action {
            ColumnAction::Search {
                query,
                top_k,
                table_id,
            } => {
                query::run_column_search(&cfg, &query, top_k, table_id.as_deref()).await?;
            }
            ColumnAction::List { table_id } => get::run_column_list(&cfg, &table_id).await?,
            ColumnAction::Details { column_id } => {
                get::run_column_details(&cfg, &column_id).await?;
            }
        },
        Commands::View { action } => match action {
            ViewAction::Search { query, top_k } => {
                query::run_view_search(&cfg, &query, top_k).await?;
            }
            ViewAction::Add {
                id,
                name,
                module,
                submodule,
                description,
                sql,
                tables,
            } => {
                let view = NewView {
                    id,
                    name,
                    module,
                    submodule,
                    description,
                    sql_query: sql,
                    tables_used: tables,
                };
                ingest::run_view_add(&cfg, view).await?;
            }
        },
        Commands::Table { action } => match action {
            TableAction::Details { table_id } => get::run_table_details(&cfg, &table_id).await?,
        },
        Commands::LinkColumns { dataset, output } => {
            verify::run_link_columns(&cfg, &dataset, output.as_deref()).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, node_type } => {
                embed_cmd::run_embed_pending(&cfg, limit, node_type).await?;
            }
        },
        Commands::Info => stats::run_info(&cfg).await?,
    }

    Ok(())
}
