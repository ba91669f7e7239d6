//! Deferred foreign-key resolution.
//!
//! Runs once every module file of a run has been parsed, so the outcome does
//! not depend on the order files were supplied in.

use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::Error;
use crate::models::{column_id, ColumnNode, TableNode, TableReference, ViewNode};
use crate::parse::{IngestContext, Violation};

/// A fully resolved ingestion run, ready to persist.
#[derive(Debug, Default)]
pub struct ParsedSchema {
    pub tables: BTreeMap<String, TableNode>,
    pub columns: BTreeMap<String, ColumnNode>,
    pub views: BTreeMap<String, ViewNode>,
    /// Confirmed table-to-table references, deduplicated.
    pub relationships: Vec<TableReference>,
    pub violations: Vec<Violation>,
    /// Facts discarded because an endpoint table was not loaded.
    pub dropped_facts: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
}

/// Turn pending foreign-key facts into confirmed references.
///
/// A reference is kept only when both tables are in the loaded set; repeats
/// of the same `(source, target, column)` collapse into one. Independently of
/// that, any parsed column named by a fact is flagged as a foreign key
/// pointing at `{target}_{column}`, which may not exist as a node.
pub fn resolve(ctx: IngestContext) -> ParsedSchema {
    let IngestContext {
        tables,
        mut columns,
        views,
        pending,
        violations,
        files_parsed,
        files_skipped,
    } = ctx;

    let mut seen = HashSet::new();
    let mut relationships = Vec::new();
    let mut dropped_facts = 0;

    for fact in pending {
        let source_column = column_id(&fact.source_table_id, &fact.fk_column);
        let target_column = column_id(&fact.target_table_id, &fact.fk_column);

        if let Some(column) = columns.get_mut(&source_column) {
            column.is_foreign_key = true;
            column.references_column = Some(target_column);
        }

        let missing = [&fact.source_table_id, &fact.target_table_id]
            .into_iter()
            .find(|id| !tables.contains_key(id.as_str()));
        if let Some(missing) = missing {
            let err = Error::DanglingReference {
                source_id: fact.source_table_id.clone(),
                target_id: fact.target_table_id.clone(),
            };
            debug!(missing = %missing, "dropping foreign key: {}", err);
            dropped_facts += 1;
            continue;
        }

        let key = (
            fact.source_table_id.clone(),
            fact.target_table_id.clone(),
            fact.fk_column.to_lowercase(),
        );
        if !seen.insert(key) {
            continue;
        }

        relationships.push(TableReference {
            source_id: fact.source_table_id,
            target_id: fact.target_table_id,
            foreign_key_column: fact.fk_column,
        });
    }

    ParsedSchema {
        tables,
        columns,
        views,
        relationships,
        violations,
        dropped_facts,
        files_parsed,
        files_skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(tables: &[(&str, &[&str], &[(&str, &str)])]) -> String {
        let records: Vec<serde_json::Value> = tables
            .iter()
            .map(|(name, cols, fks)| {
                serde_json::json!({
                    "table_title": name,
                    "data": {
                        "columns": cols.iter().map(|c| serde_json::json!({"name": c, "datatype": "NUMBER"})).collect::<Vec<_>>(),
                        "foreign_keys": fks.iter().map(|(target, col)| serde_json::json!({
                            "table": name, "foreign_table": target, "foreign_key_column": col
                        })).collect::<Vec<_>>(),
                    }
                })
            })
            .collect();
        serde_json::json!([{"tableview_title": "01 Tab", "table_data": records}]).to_string()
    }

    #[test]
    fn resolution_is_independent_of_file_order() {
        let orders = module(&[("ORDERS", &["ORDER_ID", "CUSTOMER_ID"], &[("CUST_ACCOUNT", "CUSTOMER_ID")])]);
        let customers = module(&[("CUST_ACCOUNT", &["CUSTOMER_ID"], &[])]);

        let mut forward = IngestContext::new();
        forward.parse_module(&orders, "A", "a").unwrap();
        forward.parse_module(&customers, "B", "b").unwrap();
        let mut backward = IngestContext::new();
        backward.parse_module(&customers, "B", "b").unwrap();
        backward.parse_module(&orders, "A", "a").unwrap();

        let forward = resolve(forward);
        let backward = resolve(backward);
        assert_eq!(forward.relationships, backward.relationships);
        assert_eq!(
            forward.relationships,
            vec![TableReference {
                source_id: "orders".into(),
                target_id: "cust_account".into(),
                foreign_key_column: "CUSTOMER_ID".into(),
            }]
        );
        let fk = &forward.columns["orders_customer_id"];
        assert!(fk.is_foreign_key);
        assert_eq!(fk.references_column.as_deref(), Some("cust_account_customer_id"));
    }

    #[test]
    fn dangling_facts_are_dropped_but_column_still_flagged() {
        let orders = module(&[("ORDERS", &["CUSTOMER_ID"], &[("MISSING_TABLE", "CUSTOMER_ID")])]);
        let mut ctx = IngestContext::new();
        ctx.parse_module(&orders, "A", "a").unwrap();
        let parsed = resolve(ctx);
        assert!(parsed.relationships.is_empty());
        assert_eq!(parsed.dropped_facts, 1);
        assert!(parsed.columns["orders_customer_id"].is_foreign_key);
        assert_eq!(
            parsed.columns["orders_customer_id"].references_column.as_deref(),
            Some("missing_table_customer_id")
        );
    }

    #[test]
    fn repeated_foreign_keys_collapse() {
        let json = module(&[
            ("ORDERS", &["CUSTOMER_ID", "BILL_TO_ID"], &[
                ("CUST_ACCOUNT", "CUSTOMER_ID"),
                ("CUST_ACCOUNT", "customer_id"),
                ("CUST_ACCOUNT", "BILL_TO_ID"),
            ]),
            ("CUST_ACCOUNT", &["CUSTOMER_ID"], &[]),
        ]);
        let mut ctx = IngestContext::new();
        ctx.parse_module(&json, "A", "a").unwrap();
        let parsed = resolve(ctx);
        assert_eq!(parsed.relationships.len(), 2);
        assert_eq!(parsed.relationships[1].foreign_key_column, "BILL_TO_ID");
    }

    #[test]
    fn columns_not_named_by_facts_stay_unflagged() {
        let json = module(&[("ORDERS", &["ORDER_ID"], &[])]);
        let mut ctx = IngestContext::new();
        ctx.parse_module(&json, "A", "a").unwrap();
        let parsed = resolve(ctx);
        assert!(!parsed.columns["orders_order_id"].is_foreign_key);
        assert_eq!(parsed.columns["orders_order_id"].references_column, None);
    }
}
