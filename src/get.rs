//! Point lookups: a table's definition, its columns, and a single column
//! with its reference target.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::ColumnNode;
use crate::store::GraphStore;

/// CLI entry point for `column list`.
pub async fn run_column_list(config: &Config, table_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let table_id = table_id.to_lowercase();
    if !store.node_exists(crate::models::NodeKind::Table, &table_id).await? {
        bail!("table not found: {}", table_id);
    }

    let columns = store.columns_for_table(&table_id).await?;
    println!("Columns of {} ({}):", table_id, columns.len());
    for column in &columns {
        println!("  {}", column_line(column));
    }
    Ok(())
}

/// CLI entry point for `column details`.
pub async fn run_column_details(config: &Config, column_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let column_id = column_id.to_lowercase();
    let Some(details) = store.column_details(&column_id).await? else {
        bail!("column not found: {}", column_id);
    };

    let column = &details.column;
    println!("{} ({})", column.name, column.id);
    println!("  table:       {}", column.table_id);
    println!("  type:        {}", column.datatype);
    println!("  nullable:    {}", if column.is_nullable { "yes" } else { "no" });
    println!("  primary key: {}", if column.is_primary_key { "yes" } else { "no" });
    if column.is_foreign_key {
        match (&details.referenced_column_name, &details.referenced_table_id) {
            (Some(name), Some(table)) => println!("  references:  {}.{}", table, name),
            _ => println!(
                "  references:  {} (not in graph)",
                column.references_column.as_deref().unwrap_or("?")
            ),
        }
    }
    if let Some(description) = &column.description {
        println!("  description: {}", description);
    }
    Ok(())
}

/// CLI entry point for `table details`.
pub async fn run_table_details(config: &Config, table_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let table_id = table_id.to_lowercase();
    let Some(table) = store.get_table(&table_id).await? else {
        bail!("table not found: {}", table_id);
    };

    println!("{} ({})", table.name, table.id);
    println!("  module:      {} / {}", table.module, table.submodule);
    if let Some(schema) = &table.details.schema {
        println!("  schema:      {}", schema);
    }
    if let Some(object_type) = &table.details.object_type {
        println!("  object type: {}", object_type);
    }
    if let Some(description) = &table.description {
        println!("  description: {}", description);
    }
    if let Some(pk) = &table.primary_key {
        println!("  primary key: {} ({})", pk.name, pk.columns);
    }
    if !table.indexes.is_empty() {
        println!("  indexes:");
        for index in &table.indexes {
            println!(
                "    {} [{}] {}",
                index.name,
                index.uniqueness,
                index.columns.join(", ")
            );
        }
    }

    let references = store.table_references(&table_id).await?;
    let (outgoing, incoming): (Vec<_>, Vec<_>) =
        references.iter().partition(|r| r.source_id == table_id);
    if !outgoing.is_empty() {
        println!("  references:");
        for r in outgoing {
            println!("    -> {} via {}", r.target_id, r.foreign_key_column);
        }
    }
    if !incoming.is_empty() {
        println!("  referenced by:");
        for r in incoming {
            println!("    <- {} via {}", r.source_id, r.foreign_key_column);
        }
    }

    let columns = store.columns_for_table(&table_id).await?;
    println!("  columns ({}):", columns.len());
    for column in &columns {
        println!("    {}", column_line(column));
    }
    Ok(())
}

fn column_line(column: &ColumnNode) -> String {
    let mut line = format!("{:<32} {:<14}", column.name, column.datatype);
    if column.is_primary_key {
        line.push_str(" PK");
    }
    if column.is_foreign_key {
        match &column.references_column {
            Some(target) => line.push_str(&format!(" FK -> {}", target)),
            None => line.push_str(" FK"),
        }
    }
    if !column.is_nullable {
        line.push_str(" NOT NULL");
    }
    line.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> ColumnNode {
        ColumnNode {
            id: format!("t_{}", name.to_lowercase()),
            name: name.to_string(),
            table_id: "t".into(),
            datatype: "NUMBER".into(),
            length: None,
            precision: None,
            is_nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
            references_column: None,
            description: None,
            embedding: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn plain_column_line_has_no_flags() {
        assert_eq!(column_line(&column("AMOUNT")), format!("{:<32} NUMBER", "AMOUNT"));
    }

    #[test]
    fn key_flags_are_listed() {
        let mut c = column("CUSTOMER_ID");
        c.is_primary_key = true;
        c.is_nullable = false;
        c.is_foreign_key = true;
        c.references_column = Some("customers_customer_id".into());
        let line = column_line(&c);
        assert!(line.ends_with("PK FK -> customers_customer_id NOT NULL"));
    }
}
