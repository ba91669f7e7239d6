//! Schema ingestion parser.
//!
//! Turns module export files into draft [`TableNode`]s and [`ColumnNode`]s
//! plus a list of pending foreign-key facts. All state for one run lives in
//! an [`IngestContext`]; nothing is shared between runs.
//!
//! # Input shape
//!
//! ```text
//! [ { "tableview_title": "01 General Ledger",
//!     "table_data": [ { "table_title": "GL_LEDGERS",
//!                       "data": { "short_description": ..., "details": {...},
//!                                 "primary_key": {...}, "columns": [...],
//!                                 "indexes": [...], "foreign_keys": [...] } } ] } ]
//! ```
//!
//! Records are decoded one at a time into typed raw structs, so a record
//! with a bad or missing field is skipped and reported as a [`Violation`]
//! while its siblings continue. A file that cannot be decoded even after
//! [`repair_json`] is skipped as a whole.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::models::{
    column_id, ColumnDef, ColumnNode, IndexDef, PrimaryKey, TableDetails, TableNode, ViewNode,
};

/// A foreign key observed during parsing, not yet checked against the set of
/// loaded tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyFact {
    pub source_table_id: String,
    pub target_table_id: String,
    pub fk_column: String,
}

/// A record that was skipped, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub source: String,
    pub record: String,
    pub message: String,
}

/// Accumulated output of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestContext {
    pub tables: BTreeMap<String, TableNode>,
    pub columns: BTreeMap<String, ColumnNode>,
    pub views: BTreeMap<String, ViewNode>,
    pub pending: Vec<ForeignKeyFact>,
    pub violations: Vec<Violation>,
    pub files_parsed: usize,
    pub files_skipped: usize,
}

// ============ Raw record types ============

/// A column list given either as `"A, B"` or `["A", "B"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ColumnList {
    Csv(String),
    List(Vec<String>),
}

impl ColumnList {
    fn names(&self) -> Vec<String> {
        match self {
            ColumnList::Csv(s) => s
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            ColumnList::List(v) => v
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTableRecord {
    table_title: String,
    data: RawTableData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTableData {
    #[serde(deserialize_with = "opt_scalar")]
    short_description: Option<String>,
    details: Option<RawDetails>,
    primary_key: Option<RawPrimaryKey>,
    columns: Value,
    indexes: Value,
    foreign_keys: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDetails {
    #[serde(deserialize_with = "opt_scalar")]
    schema: Option<String>,
    #[serde(deserialize_with = "opt_scalar")]
    object_owner: Option<String>,
    #[serde(deserialize_with = "opt_scalar")]
    object_type: Option<String>,
    #[serde(deserialize_with = "opt_scalar")]
    tablespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPrimaryKey {
    #[serde(default, deserialize_with = "opt_scalar")]
    name: Option<String>,
    #[serde(default)]
    columns: Option<ColumnList>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
    #[serde(default, deserialize_with = "opt_scalar")]
    datatype: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    length: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    precision: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    not_null: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    comments: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    flexfield_mapping: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default, rename = "index", deserialize_with = "opt_scalar")]
    name: Option<String>,
    #[serde(default)]
    columns: Option<ColumnList>,
    #[serde(default, deserialize_with = "opt_scalar")]
    tablespace: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    uniqueness: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawForeignKey {
    #[serde(default)]
    table: String,
    foreign_table: String,
    foreign_key_column: String,
}

#[derive(Debug, Deserialize)]
struct RawView {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "opt_scalar")]
    module: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    submodule: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    description: Option<String>,
    #[serde(default)]
    sql_query: String,
    #[serde(default)]
    tables_used: Vec<String>,
}

/// Accept a string, number or bool (or null) and keep it as text.
fn opt_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a scalar, got {}", other))),
    }
}

// ============ Ingestion context ============

impl IngestContext {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            columns: BTreeMap::new(),
            views: BTreeMap::new(),
            pending: Vec::new(),
            violations: Vec::new(),
            files_parsed: 0,
            files_skipped: 0,
        }
    }

    /// Parse every module file in order. Missing or undecodable files are
    /// logged and skipped; they never abort the run.
    pub fn parse_files<P: AsRef<Path>>(&mut self, paths: &[P]) {
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                warn!(file = %path.display(), "module file not found, skipping");
                self.files_skipped += 1;
                continue;
            }
            match self.parse_file(path) {
                Ok(count) => {
                    info!(file = %path.display(), tables = count, "parsed module file");
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "failed to parse module file, skipping");
                    self.files_skipped += 1;
                }
            }
        }
    }

    /// Parse one module file. The module name is the file name up to its
    /// first `.`. Returns the number of tables added.
    pub fn parse_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let module = module_name(path);
        self.parse_module(&content, &module, &path.display().to_string())
    }

    /// Parse the text of one module export.
    pub fn parse_module(&mut self, content: &str, module: &str, source: &str) -> Result<usize> {
        let tabs = decode_list(content, source)?;
        self.files_parsed += 1;

        let before = self.tables.len();
        for tab in &tabs {
            let Some(title) = tab.get("tableview_title").and_then(Value::as_str) else {
                continue;
            };
            let submodule = strip_ordinal(title).to_string();

            let Some(records) = tab.get("table_data").and_then(Value::as_array) else {
                continue;
            };
            for record in records {
                if let Err(e) = self.add_table_record(record, module, &submodule) {
                    self.record_violation(source, e);
                }
            }
        }
        Ok(self.tables.len() - before)
    }

    /// Parse a JSON list of view records.
    pub fn parse_views(&mut self, content: &str, source: &str) -> Result<usize> {
        let records = decode_list(content, source)?;
        let mut added = 0;
        for record in &records {
            match parse_view(record, "Unknown", "Unknown") {
                Ok(view) => {
                    self.views.insert(view.id.clone(), view);
                    added += 1;
                }
                Err(e) => self.record_violation(source, e),
            }
        }
        Ok(added)
    }

    fn record_violation(&mut self, source: &str, err: Error) {
        let (record, message) = match err {
            Error::MissingField { record, message } => (record, message),
            other => ("<unknown>".to_string(), other.to_string()),
        };
        warn!(source, record = %record, "skipping record: {}", message);
        self.violations.push(Violation {
            source: source.to_string(),
            record,
            message,
        });
    }

    fn add_table_record(&mut self, record: &Value, module: &str, submodule: &str) -> Result<()> {
        let label = record
            .get("table_title")
            .and_then(Value::as_str)
            .unwrap_or("<untitled table>")
            .to_string();
        let raw: RawTableRecord =
            RawTableRecord::deserialize(record).map_err(|e| Error::MissingField {
                record: label.clone(),
                message: e.to_string(),
            })?;

        let table_id = raw.table_title.trim().to_lowercase();
        if table_id.is_empty() {
            return Err(Error::MissingField {
                record: label,
                message: "table_title is empty".to_string(),
            });
        }
        if self.tables.contains_key(&table_id) {
            debug!(table = %table_id, "duplicate table title, keeping first occurrence");
            return Ok(());
        }

        let data = raw.data;
        let primary_key = data.primary_key.map(|pk| PrimaryKey {
            name: pk.name.unwrap_or_default(),
            columns: pk.columns.map(|c| c.names().join(", ")).unwrap_or_default(),
        });
        let pk_columns: Vec<String> = primary_key
            .as_ref()
            .map(|pk| pk.column_names())
            .unwrap_or_default();

        let mut columns = Vec::new();
        for value in records_of(&data.columns) {
            let col = match RawColumn::deserialize(value) {
                Ok(col) if !col.name.trim().is_empty() => col,
                Ok(_) => {
                    self.push_violation(&label, "column with empty name".to_string());
                    continue;
                }
                Err(e) => {
                    self.push_violation(&label, format!("column: {}", e));
                    continue;
                }
            };
            let name = col.name.trim().to_string();
            let id = column_id(&table_id, &name);
            let is_primary_key = pk_columns.iter().any(|pk| pk.eq_ignore_ascii_case(&name));

            self.columns.insert(
                id.clone(),
                ColumnNode {
                    id,
                    name: name.clone(),
                    datatype: col.datatype.clone().unwrap_or_default(),
                    table_id: table_id.clone(),
                    description: non_empty(col.comments.clone()),
                    length: col.length.clone(),
                    precision: col.precision.clone(),
                    is_nullable: !is_flag_set(col.not_null.as_deref()),
                    is_primary_key,
                    is_foreign_key: false,
                    references_column: None,
                    embedding: None,
                    created_at: None,
                    updated_at: None,
                },
            );
            columns.push(ColumnDef {
                name,
                datatype: col.datatype.unwrap_or_default(),
                length: col.length,
                precision: col.precision,
                not_null: col.not_null,
                comments: col.comments,
                flexfield_mapping: col.flexfield_mapping,
            });
        }

        let mut indexes = Vec::new();
        for value in records_of(&data.indexes) {
            match RawIndex::deserialize(value) {
                Ok(idx) => indexes.push(IndexDef {
                    name: idx.name.unwrap_or_default(),
                    columns: idx.columns.map(|c| c.names()).unwrap_or_default(),
                    tablespace: idx.tablespace,
                    uniqueness: idx.uniqueness.unwrap_or_else(|| "Non Unique".to_string()),
                }),
                Err(e) => self.push_violation(&label, format!("index: {}", e)),
            }
        }

        for value in records_of(&data.foreign_keys) {
            match RawForeignKey::deserialize(value) {
                Ok(fk) if fk.foreign_table.trim().is_empty() || fk.foreign_key_column.trim().is_empty() => {
                    self.push_violation(&label, "foreign key without target table or column".to_string());
                }
                Ok(fk) => {
                    let source = fk.table.trim().to_lowercase();
                    self.pending.push(ForeignKeyFact {
                        source_table_id: if source.is_empty() { table_id.clone() } else { source },
                        target_table_id: fk.foreign_table.trim().to_lowercase(),
                        fk_column: fk.foreign_key_column.trim().to_string(),
                    });
                }
                Err(e) => self.push_violation(&label, format!("foreign key: {}", e)),
            }
        }

        let details = data.details.unwrap_or_default();
        let table = TableNode {
            id: table_id.clone(),
            name: raw.table_title.trim().to_string(),
            module: module.to_string(),
            submodule: submodule.to_string(),
            description: non_empty(data.short_description.map(|d| collapse_whitespace(&d))),
            details: TableDetails {
                schema: details.schema.or_else(|| Some("FUSION".to_string())),
                object_owner: details.object_owner,
                object_type: details.object_type.or_else(|| Some("TABLE".to_string())),
                tablespace: details.tablespace,
            },
            primary_key,
            columns,
            indexes,
            embedding: None,
            created_at: None,
            updated_at: None,
        };
        self.tables.insert(table_id, table);
        Ok(())
    }

    fn push_violation(&mut self, record: &str, message: String) {
        warn!(record, "{}", message);
        self.violations.push(Violation {
            source: String::new(),
            record: record.to_string(),
            message,
        });
    }
}

/// Decode one view record. `id`, `name`, `sql_query` and a non-empty
/// `tables_used` are required; ids and table ids are lowercased.
pub fn parse_view(record: &Value, default_module: &str, default_submodule: &str) -> Result<ViewNode> {
    let label = record
        .get("name")
        .or_else(|| record.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("<unnamed view>")
        .to_string();
    let raw = RawView::deserialize(record).map_err(|e| Error::MissingField {
        record: label.clone(),
        message: e.to_string(),
    })?;

    let mut missing = Vec::new();
    if raw.id.trim().is_empty() {
        missing.push("id");
    }
    if raw.name.trim().is_empty() {
        missing.push("name");
    }
    if raw.sql_query.trim().is_empty() {
        missing.push("sql_query");
    }
    if raw.tables_used.iter().all(|t| t.trim().is_empty()) {
        missing.push("tables_used");
    }
    if !missing.is_empty() {
        return Err(Error::MissingField {
            record: label,
            message: format!("required fields missing or empty: {}", missing.join(", ")),
        });
    }

    Ok(ViewNode {
        id: raw.id.trim().to_lowercase(),
        name: raw.name.trim().to_string(),
        module: non_empty(raw.module).unwrap_or_else(|| default_module.to_string()),
        submodule: non_empty(raw.submodule).unwrap_or_else(|| default_submodule.to_string()),
        description: non_empty(raw.description),
        sql_query: raw.sql_query,
        tables_used: raw
            .tables_used
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        embedding: None,
        created_at: None,
        updated_at: None,
    })
}

/// Decode a top-level JSON list, repairing it once if the first attempt fails.
fn decode_list(content: &str, source: &str) -> Result<Vec<Value>> {
    let value = match serde_json::from_str::<Value>(content) {
        Ok(v) => v,
        Err(first) => {
            debug!(source, error = %first, "decode failed, attempting repair");
            serde_json::from_str::<Value>(&repair_json(content)).map_err(|e| Error::Parse {
                file: source.to_string(),
                message: e.to_string(),
            })?
        }
    };
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(Error::Parse {
            file: source.to_string(),
            message: "expected a top-level list".to_string(),
        }),
    }
}

/// Heuristic repair for truncated exports: closes an unterminated top-level
/// array and drops commas that directly precede `}` or `]`. Commas inside
/// string literals are left alone.
pub fn repair_json(content: &str) -> String {
    let trimmed = content.trim();
    let mut out = String::with_capacity(trimmed.len() + 1);
    let mut pending_comma: Option<String> = None;
    let mut in_string = false;
    let mut escaped = false;

    for ch in trimmed.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if let Some(buf) = pending_comma.as_mut() {
            if ch.is_whitespace() {
                buf.push(ch);
                continue;
            }
            let held = pending_comma.take().unwrap_or_default();
            if ch == '}' || ch == ']' {
                // drop the comma, keep the whitespace after it
                out.push_str(&held[1..]);
            } else {
                out.push_str(&held);
            }
        }

        match ch {
            ',' => pending_comma = Some(String::from(",")),
            '"' => {
                in_string = true;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    if let Some(held) = pending_comma {
        out.push_str(&held[1..]);
    }

    let out = out.trim_end().to_string();
    if out.starts_with('[') && !out.ends_with(']') {
        out + "]"
    } else {
        out
    }
}

fn records_of(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn module_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// `"12 General Ledger"` -> `"General Ledger"`.
pub fn strip_ordinal(title: &str) -> &str {
    let rest = title.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == title.len() {
        return title;
    }
    let stripped = rest.trim_start();
    if stripped.len() == rest.len() {
        title
    } else {
        stripped
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Exports mark NOT NULL with free text ("Yes", "Y", "true"); blank and
/// explicit negatives count as unset.
fn is_flag_set(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !matches!(v.as_str(), "" | "n" | "no" | "false" | "0"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_json() -> String {
        r#"[
          {"tableview_title": "01 Receivables",
           "table_data": [
             {"table_title": "CUST_ACCOUNT",
              "data": {
                "short_description": "Customer\n  accounts ",
                "primary_key": {"name": "CUST_ACCOUNT_PK", "columns": "CUSTOMER_ID"},
                "columns": [
                  {"name": "CUSTOMER_ID", "datatype": "NUMBER", "length": 18, "not_null": "Yes"},
                  {"name": "ACCOUNT_NAME", "datatype": "VARCHAR2", "length": "240", "comments": "Display name"}
                ],
                "indexes": [{"index": "CUST_ACCOUNT_U1", "columns": "CUSTOMER_ID", "uniqueness": "Unique"}]
              }},
             {"table_title": "ORDERS",
              "data": {
                "primary_key": {"name": "ORDERS_PK", "columns": ["ORDER_ID"]},
                "columns": [
                  {"name": "ORDER_ID", "datatype": "NUMBER"},
                  {"name": "CUSTOMER_ID", "datatype": "NUMBER"}
                ],
                "foreign_keys": [{"table": "orders", "foreign_table": "cust_account", "foreign_key_column": "customer_id"}]
              }}
           ]}
        ]"#
        .to_string()
    }

    #[test]
    fn parses_tables_columns_and_pending_facts() {
        let mut ctx = IngestContext::new();
        let added = ctx.parse_module(&module_json(), "Financials", "mem").unwrap();
        assert_eq!(added, 2);
        assert!(ctx.tables.contains_key("cust_account"));
        assert!(ctx.tables.contains_key("orders"));

        let cust = &ctx.tables["cust_account"];
        assert_eq!(cust.module, "Financials");
        assert_eq!(cust.submodule, "Receivables");
        assert_eq!(cust.description.as_deref(), Some("Customer accounts"));
        assert_eq!(cust.columns.len(), 2);
        assert_eq!(cust.columns[0].length.as_deref(), Some("18"));
        assert_eq!(cust.indexes[0].columns, vec!["CUSTOMER_ID"]);
        assert_eq!(cust.details.schema.as_deref(), Some("FUSION"));

        let pk = &ctx.columns["cust_account_customer_id"];
        assert!(pk.is_primary_key);
        assert!(!pk.is_nullable);
        assert!(!ctx.columns["cust_account_account_name"].is_primary_key);
        assert!(ctx.columns["orders_order_id"].is_primary_key);

        assert_eq!(
            ctx.pending,
            vec![ForeignKeyFact {
                source_table_id: "orders".into(),
                target_table_id: "cust_account".into(),
                fk_column: "customer_id".into(),
            }]
        );
        // foreign key flags are left to the resolver
        assert!(!ctx.columns["orders_customer_id"].is_foreign_key);
    }

    #[test]
    fn first_duplicate_table_wins() {
        let json = r#"[{"tableview_title": "A", "table_data": [
            {"table_title": "DUP", "data": {"short_description": "first", "columns": [{"name": "X", "datatype": "NUMBER"}]}},
            {"table_title": "dup", "data": {"short_description": "second", "columns": [{"name": "Y", "datatype": "NUMBER"}]}}
        ]}]"#;
        let mut ctx = IngestContext::new();
        ctx.parse_module(json, "M", "mem").unwrap();
        assert_eq!(ctx.tables.len(), 1);
        assert_eq!(ctx.tables["dup"].description.as_deref(), Some("first"));
        assert!(ctx.columns.contains_key("dup_x"));
        assert!(!ctx.columns.contains_key("dup_y"));
    }

    #[test]
    fn record_missing_data_is_skipped_and_reported() {
        let json = r#"[{"tableview_title": "A", "table_data": [
            {"table_title": "NO_DATA"},
            {"table_title": "GOOD", "data": {}}
        ]}]"#;
        let mut ctx = IngestContext::new();
        ctx.parse_module(json, "M", "mem").unwrap();
        assert_eq!(ctx.tables.len(), 1);
        assert!(ctx.tables.contains_key("good"));
        assert_eq!(ctx.violations.len(), 1);
        assert_eq!(ctx.violations[0].record, "NO_DATA");
        assert!(ctx.violations[0].message.contains("data"));
    }

    #[test]
    fn bad_column_skipped_siblings_kept() {
        let json = r#"[{"tableview_title": "A", "table_data": [
            {"table_title": "T", "data": {"columns": [
                {"datatype": "NUMBER"},
                {"name": "OK", "datatype": "NUMBER", "comments": ["not", "scalar"]},
                {"name": "FINE", "datatype": "DATE"}
            ]}}
        ]}]"#;
        let mut ctx = IngestContext::new();
        ctx.parse_module(json, "M", "mem").unwrap();
        assert_eq!(ctx.tables["t"].columns.len(), 1);
        assert!(ctx.columns.contains_key("t_fine"));
        assert_eq!(ctx.violations.len(), 2);
    }

    #[test]
    fn tabs_without_title_are_ignored() {
        let json = r#"[{"table_data": [{"table_title": "T", "data": {}}]}]"#;
        let mut ctx = IngestContext::new();
        assert_eq!(ctx.parse_module(json, "M", "mem").unwrap(), 0);
    }

    #[test]
    fn repair_closes_array_and_strips_trailing_commas() {
        let broken = "[{\"a\": [1, 2, ], \"s\": \"x, ]\",}, \n";
        let repaired = repair_json(broken);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(v[0]["a"], serde_json::json!([1, 2]));
        assert_eq!(v[0]["s"], "x, ]");
    }

    #[test]
    fn repaired_module_parses() {
        let broken = r#"[{"tableview_title": "A", "table_data": [{"table_title": "T", "data": {"columns": [{"name": "C", "datatype": "NUMBER"},]}},]},"#;
        let mut ctx = IngestContext::new();
        assert_eq!(ctx.parse_module(broken, "M", "mem").unwrap(), 1);
    }

    #[test]
    fn unrepairable_module_is_parse_error() {
        let mut ctx = IngestContext::new();
        let err = ctx.parse_module("{not json", "M", "bad.json").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        let err = ctx.parse_module("{\"a\": 1}", "M", "obj.json").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn parse_files_skips_missing_and_bad_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("Financials.json");
        let bad = dir.path().join("Broken.json");
        std::fs::write(&good, module_json()).unwrap();
        std::fs::write(&bad, "{{{{").unwrap();
        let missing = dir.path().join("Missing.json");

        let mut ctx = IngestContext::new();
        ctx.parse_files(&[missing, bad, good]);
        assert_eq!(ctx.files_parsed, 1);
        assert_eq!(ctx.files_skipped, 2);
        assert_eq!(ctx.tables.len(), 2);
        assert_eq!(ctx.tables["orders"].module, "Financials");
    }

    #[test]
    fn strip_ordinal_requires_whitespace() {
        assert_eq!(strip_ordinal("01 General Ledger"), "General Ledger");
        assert_eq!(strip_ordinal("3D Models"), "3D Models");
        assert_eq!(strip_ordinal("Payables"), "Payables");
    }

    #[test]
    fn not_null_flag_semantics() {
        assert!(is_flag_set(Some("Yes")));
        assert!(is_flag_set(Some("true")));
        assert!(!is_flag_set(Some("")));
        assert!(!is_flag_set(Some("N")));
        assert!(!is_flag_set(None));
    }

    #[test]
    fn view_requires_fields_and_lowercases() {
        let ok = serde_json::json!({
            "id": "V_ORDERS", "name": "Orders View", "sql_query": "select 1",
            "tables_used": ["ORDERS", "Cust_Account"]
        });
        let view = parse_view(&ok, "Unknown", "Unknown").unwrap();
        assert_eq!(view.id, "v_orders");
        assert_eq!(view.tables_used, vec!["orders", "cust_account"]);
        assert_eq!(view.module, "Unknown");

        let bad = serde_json::json!({"id": "v", "name": "V", "tables_used": []});
        match parse_view(&bad, "M", "S").unwrap_err() {
            Error::MissingField { message, .. } => {
                assert!(message.contains("sql_query"));
                assert!(message.contains("tables_used"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn parse_views_collects_valid_records() {
        let json = r#"[
            {"id": "V1", "name": "One", "sql_query": "select", "tables_used": ["T"], "module": "Fin"},
            {"id": "", "name": "Two"}
        ]"#;
        let mut ctx = IngestContext::new();
        assert_eq!(ctx.parse_views(json, "views.json").unwrap(), 1);
        assert_eq!(ctx.views["v1"].module, "Fin");
        assert_eq!(ctx.violations.len(), 1);
    }
}
