//! Core data models: graph nodes, their denormalized definitions, and edges.
//!
//! All node identifiers are lowercase. Column ids are derived from the owning
//! table id and the column name (see [`column_id`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three node labels held by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    Table,
    Column,
    View,
}

impl NodeKind {
    pub const ALL: [NodeKind; 3] = [NodeKind::Table, NodeKind::Column, NodeKind::View];

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Table => "TABLE",
            NodeKind::Column => "COLUMN",
            NodeKind::View => "VIEW",
        }
    }

    /// Name of the backing SQLite table for this label.
    pub fn table_name(&self) -> &'static str {
        match self {
            NodeKind::Table => "table_nodes",
            NodeKind::Column => "column_nodes",
            NodeKind::View => "view_nodes",
        }
    }

    /// Name of the vector index for this label.
    pub fn index_name(&self) -> &'static str {
        match self {
            NodeKind::Table => "table_embedding",
            NodeKind::Column => "column_embedding",
            NodeKind::View => "view_embedding",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Deterministic column id: `{table_id}_{column name}`, lowercased.
pub fn column_id(table_id: &str, column_name: &str) -> String {
    format!("{}_{}", table_id.to_lowercase(), column_name.to_lowercase())
}

/// A column definition as it appears in the source export. Stored on the
/// table node as a denormalized snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: String,
    pub length: Option<String>,
    pub precision: Option<String>,
    pub not_null: Option<String>,
    pub comments: Option<String>,
    pub flexfield_mapping: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub tablespace: Option<String>,
    pub uniqueness: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: String,
    /// Comma-separated column names.
    pub columns: String,
}

impl PrimaryKey {
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDetails {
    pub schema: Option<String>,
    pub object_owner: Option<String>,
    pub object_type: Option<String>,
    pub tablespace: Option<String>,
}

impl Default for TableDetails {
    fn default() -> Self {
        Self {
            schema: Some("FUSION".to_string()),
            object_owner: None,
            object_type: Some("TABLE".to_string()),
            tablespace: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableNode {
    pub id: String,
    pub name: String,
    pub module: String,
    pub submodule: String,
    pub description: Option<String>,
    pub details: TableDetails,
    pub primary_key: Option<PrimaryKey>,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnNode {
    pub id: String,
    pub name: String,
    pub datatype: String,
    pub table_id: String,
    pub description: Option<String>,
    pub length: Option<String>,
    pub precision: Option<String>,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub references_column: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewNode {
    pub id: String,
    pub name: String,
    pub module: String,
    pub submodule: String,
    pub description: Option<String>,
    pub sql_query: String,
    pub tables_used: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A confirmed table-level foreign key, produced by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableReference {
    pub source_id: String,
    pub target_id: String,
    pub foreign_key_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    HasColumn,
    References,
    UsesTable,
    ReferencesColumn,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::HasColumn,
        EdgeKind::References,
        EdgeKind::UsesTable,
        EdgeKind::ReferencesColumn,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::HasColumn => "HAS_COLUMN",
            EdgeKind::References => "REFERENCES",
            EdgeKind::UsesTable => "USES_TABLE",
            EdgeKind::ReferencesColumn => "REFERENCES_COLUMN",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A typed, directed edge between two nodes. Built only through the
/// constructors, which fix the endpoint labels for each edge kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub source_kind: NodeKind,
    pub source_id: String,
    pub target_kind: NodeKind,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key_column: Option<String>,
}

impl Edge {
    pub fn has_column(table_id: &str, column_id: &str) -> Self {
        Self::new(EdgeKind::HasColumn, NodeKind::Table, table_id, NodeKind::Column, column_id, None)
    }

    pub fn table_reference(reference: &TableReference) -> Self {
        Self::new(
            EdgeKind::References,
            NodeKind::Table,
            &reference.source_id,
            NodeKind::Table,
            &reference.target_id,
            Some(reference.foreign_key_column.clone()),
        )
    }

    pub fn column_reference(source_column_id: &str, target_column_id: &str) -> Self {
        Self::new(
            EdgeKind::References,
            NodeKind::Column,
            source_column_id,
            NodeKind::Column,
            target_column_id,
            None,
        )
    }

    pub fn uses_table(view_id: &str, table_id: &str) -> Self {
        Self::new(EdgeKind::UsesTable, NodeKind::View, view_id, NodeKind::Table, table_id, None)
    }

    pub fn references_column(view_id: &str, column_id: &str) -> Self {
        Self::new(
            EdgeKind::ReferencesColumn,
            NodeKind::View,
            view_id,
            NodeKind::Column,
            column_id,
            None,
        )
    }

    fn new(
        kind: EdgeKind,
        source_kind: NodeKind,
        source_id: &str,
        target_kind: NodeKind,
        target_id: &str,
        foreign_key_column: Option<String>,
    ) -> Self {
        Self {
            kind,
            source_kind,
            source_id: source_id.to_lowercase(),
            target_kind,
            target_id: target_id.to_lowercase(),
            foreign_key_column,
        }
    }

    /// Identity key used for match-or-create.
    pub fn key(&self) -> (EdgeKind, NodeKind, &str, NodeKind, &str, &str) {
        (
            self.kind,
            self.source_kind,
            &self.source_id,
            self.target_kind,
            &self.target_id,
            self.foreign_key_column.as_deref().unwrap_or(""),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_id_is_lowercased_and_joined() {
        assert_eq!(column_id("ORDERS", "Customer_ID"), "orders_customer_id");
        assert_eq!(column_id("orders", "customer_id"), column_id("Orders", "CUSTOMER_ID"));
    }

    #[test]
    fn primary_key_column_names_trim_and_skip_empty() {
        let pk = PrimaryKey {
            name: "PK".into(),
            columns: " A_ID , B_ID,,".into(),
        };
        assert_eq!(pk.column_names(), vec!["A_ID", "B_ID"]);
    }

    #[test]
    fn edge_constructors_fix_endpoint_kinds() {
        let e = Edge::uses_table("V1", "ORDERS");
        assert_eq!(e.source_kind, NodeKind::View);
        assert_eq!(e.target_kind, NodeKind::Table);
        assert_eq!(e.target_id, "orders");

        let r = Edge::table_reference(&TableReference {
            source_id: "orders".into(),
            target_id: "cust_account".into(),
            foreign_key_column: "customer_id".into(),
        });
        assert_eq!(r.kind, EdgeKind::References);
        assert_eq!(r.key().5, "customer_id");
    }

    #[test]
    fn edge_kind_labels_round_trip() {
        for kind in EdgeKind::ALL {
            assert_eq!(EdgeKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(EdgeKind::from_label("NOPE"), None);
    }
}
