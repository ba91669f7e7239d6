//! # Schema Graph
//!
//! Compiles a database schema export (one JSON file per business module,
//! plus SQL view definitions) into a property graph of tables, columns and
//! views, attaches embeddings to every node, and answers natural-language
//! questions about the schema with vector retrieval plus graph expansion.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌────────────┐   ┌──────────────┐
//! │ Module and │──▶│  Parse +  │──▶│   Graph    │──▶│    SQLite    │
//! │ view JSON  │   │  Resolve  │   │  builder   │   │ + sqlite-vec │
//! └────────────┘   └───────────┘   └─────┬──────┘   └──────┬───────┘
//!                                        │                 │
//!                                  ┌─────┴─────┐     ┌─────┴──────┐
//!                                  │ Embedding │     │ Retrieval  │
//!                                  │ provider  │     │ + expansion│
//!                                  └───────────┘     └─────┬──────┘
//!                                                          │
//!                                                    ┌─────┴──────┐
//!                                                    │ View-column│
//!                                                    │  verifier  │
//!                                                    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sgraph init
//! sgraph load                          # every *.json under ingest.data_dir
//! sgraph load-views views.json
//! sgraph query "customer invoices"
//! sgraph link-columns extracted_columns.json --output report.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Node, edge and identifier types |
//! | [`parse`] | Module and view file decoding |
//! | [`resolve`] | Deferred foreign-key resolution |
//! | [`embedding`] | Embedding providers, retry, embedding text |
//! | [`store`] | Graph storage trait with SQLite and in-memory backends |
//! | [`graph`] | Idempotent upserts and edge creation |
//! | [`search`] | Vector retrieval with index and scan paths |
//! | [`query`] | Query orchestration and related-table expansion |
//! | [`judge`] | Semantic match judgment |
//! | [`verify`] | View-column reconciliation |
//! | [`db`] | Database connection |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod get;
pub mod graph;
pub mod ingest;
pub mod judge;
pub mod models;
pub mod parse;
pub mod query;
pub mod resolve;
pub mod search;
pub mod stats;
pub mod store;
pub mod verify;
