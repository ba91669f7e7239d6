use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const RECEIVABLES: &str = r#"[
  {"tableview_title": "01 Receivables",
   "table_data": [
     {"table_title": "CUST_ACCOUNT",
      "data": {
        "short_description": "Customer accounts",
        "primary_key": {"name": "CUST_ACCOUNT_PK", "columns": "CUSTOMER_ID"},
        "columns": [
          {"name": "CUSTOMER_ID", "datatype": "NUMBER", "not_null": "Yes"},
          {"name": "ACCOUNT_NAME", "datatype": "VARCHAR2", "comments": "Display name"}
        ]
      }},
     {"table_title": "ORDERS",
      "data": {
        "primary_key": {"name": "ORDERS_PK", "columns": "ORDER_ID"},
        "columns": [
          {"name": "ORDER_ID", "datatype": "NUMBER"},
          {"name": "CUSTOMER_ID", "datatype": "NUMBER"}
        ],
        "foreign_keys": [
          {"table": "orders", "foreign_table": "cust_account", "foreign_key_column": "customer_id"}
        ]
      }},
   ]}
]"#;

const VIEWS: &str = r#"[
  {"id": "V_ORDERS", "name": "Orders", "module": "Financials",
   "sql_query": "SELECT ORDER_ID, CUSTOMER_ID FROM ORDERS",
   "tables_used": ["ORDERS", "MISSING_TABLE"]},
  {"id": "V_BROKEN", "name": "Broken"}
]"#;

fn sgraph_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sgraph"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let tables_dir = root.join("Tables");
    fs::create_dir_all(&tables_dir).unwrap();
    fs::write(tables_dir.join("Financials.json"), RECEIVABLES).unwrap();
    fs::write(root.join("views.json"), VIEWS).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/graph.sqlite"

[ingest]
data_dir = "{root}/Tables"

[embedding]
provider = "disabled"

[retrieval]
top_k = 5
"#,
        root = root.display()
    );

    let config_path = config_dir.join("sgraph.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sgraph(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sgraph_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sgraph binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn loaded_env() -> (TempDir, PathBuf) {
    let (tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_sgraph(&config, &["load"]);
    assert!(ok, "load failed: {}", stderr);
    (tmp, config)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Graph database initialized"));
    assert!(tmp.path().join("data/graph.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok) = run_sgraph(&config, &["init"]);
    assert!(ok);
    let (_, stderr, ok) = run_sgraph(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_load_data_dir() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["load"]);
    assert!(ok, "load failed: {}", stderr);
    assert!(stdout.contains("1 parsed, 0 skipped"), "stdout: {}", stdout);
    assert!(stdout.contains("tables:        2/2"), "stdout: {}", stdout);
    assert!(stdout.contains("columns:       4/4"), "stdout: {}", stdout);
    assert!(stdout.contains("relationships: 1/1"), "stdout: {}", stdout);
}

#[test]
fn test_load_skips_missing_files() {
    let (tmp, config) = setup_test_env();
    let present = tmp.path().join("Tables/Financials.json");
    let missing = tmp.path().join("Tables/Nope.json");
    let (stdout, stderr, ok) = run_sgraph(
        &config,
        &[
            "load",
            "--files",
            present.to_str().unwrap(),
            missing.to_str().unwrap(),
        ],
    );
    assert!(ok, "load failed: {}", stderr);
    assert!(stdout.contains("1 parsed, 1 skipped"), "stdout: {}", stdout);
}

#[test]
fn test_load_twice_no_duplicate_edges() {
    let (_tmp, config) = loaded_env();
    let (_, _, ok) = run_sgraph(&config, &["load"]);
    assert!(ok);
    let (stdout, _, _) = run_sgraph(&config, &["info"]);

    let edge_count = |label: &str| -> String {
        stdout
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with(label) && l[label.len()..].starts_with(' '))
            .and_then(|l| l.split_whitespace().last())
            .unwrap_or("0")
            .to_string()
    };
    assert_eq!(edge_count("HAS_COLUMN"), "4");
    // One table-level and one column-level reference.
    assert_eq!(edge_count("REFERENCES"), "2");
    assert!(stdout.contains("Tables:       2"));
}

#[test]
fn test_info_reports_counts() {
    let (_tmp, config) = loaded_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["info"]);
    assert!(ok, "info failed: {}", stderr);
    assert!(stdout.contains("Tables:       2"));
    assert!(stdout.contains("Columns:      4"));
    assert!(stdout.contains("primary key: 2"));
    assert!(stdout.contains("foreign key: 1"));
    assert!(stdout.contains("Vector index: unavailable"));
    assert!(stdout.contains("Financials"));
}

#[test]
fn test_column_list_primary_key_first() {
    let (_tmp, config) = loaded_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["column", "list", "CUST_ACCOUNT"]);
    assert!(ok, "column list failed: {}", stderr);
    let customer = stdout.find("CUSTOMER_ID").unwrap();
    let account = stdout.find("ACCOUNT_NAME").unwrap();
    assert!(customer < account);
}

#[test]
fn test_column_details_shows_reference() {
    let (_tmp, config) = loaded_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["column", "details", "orders_customer_id"]);
    assert!(ok, "column details failed: {}", stderr);
    assert!(stdout.contains("references:  cust_account.CUSTOMER_ID"), "stdout: {}", stdout);
}

#[test]
fn test_missing_column_errors() {
    let (_tmp, config) = loaded_env();
    let (_, stderr, ok) = run_sgraph(&config, &["column", "details", "nope_nothing"]);
    assert!(!ok);
    assert!(stderr.contains("column not found"));
}

#[test]
fn test_table_details() {
    let (_tmp, config) = loaded_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["table", "details", "orders"]);
    assert!(ok, "table details failed: {}", stderr);
    assert!(stdout.contains("-> cust_account via customer_id"));
    assert!(stdout.contains("primary key: ORDERS_PK (ORDER_ID)"));
}

#[test]
fn test_view_add_links_tables() {
    let (_tmp, config) = loaded_env();
    let (stdout, stderr, ok) = run_sgraph(
        &config,
        &[
            "view",
            "add",
            "--id",
            "V_CUSTOMER_ORDERS",
            "--name",
            "Customer Orders",
            "--sql",
            "SELECT * FROM ORDERS JOIN CUST_ACCOUNT USING (CUSTOMER_ID)",
            "--tables",
            "ORDERS,CUST_ACCOUNT",
        ],
    );
    assert!(ok, "view add failed: {}", stderr);
    assert!(stdout.contains("v_customer_orders"));
    assert!(stdout.contains("linked tables: 2 of 2"));
}

#[test]
fn test_load_views_skips_invalid_records() {
    let (tmp, config) = loaded_env();
    let views = tmp.path().join("views.json");
    let (stdout, stderr, ok) = run_sgraph(&config, &["load-views", views.to_str().unwrap()]);
    assert!(ok, "load-views failed: {}", stderr);
    assert!(stdout.contains("skipped records: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("views:         1/1"), "stdout: {}", stdout);
    assert!(stdout.contains("view tables:   1/2"), "stdout: {}", stdout);
}

#[test]
fn test_load_views_missing_file_fails() {
    let (tmp, config) = loaded_env();
    let missing = tmp.path().join("no_views.json");
    let (_, stderr, ok) = run_sgraph(&config, &["load-views", missing.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("Views file not found"));
}

#[test]
fn test_query_without_embeddings_returns_nothing() {
    let (_tmp, config) = loaded_env();
    let (stdout, stderr, ok) = run_sgraph(&config, &["query", "customer accounts"]);
    assert!(ok, "query failed: {}", stderr);
    assert!(stdout.contains("No tables found"));
}

#[test]
fn test_query_json_format() {
    let (_tmp, config) = loaded_env();
    let (stdout, _, ok) = run_sgraph(&config, &["query", "orders", "--format", "json"]);
    assert!(ok);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["query"], "orders");
    assert!(value["tables"].as_array().unwrap().is_empty());
}

#[test]
fn test_link_columns_direct_match() {
    let (tmp, config) = loaded_env();
    let views = tmp.path().join("views.json");
    let (_, _, ok) = run_sgraph(&config, &["load-views", views.to_str().unwrap()]);
    assert!(ok);

    let dataset = tmp.path().join("extracted.json");
    fs::write(
        &dataset,
        r#"{"V_ORDERS": {"view_name": "Orders", "tables_used": ["ORDERS"],
            "column_mappings": [
              {"column_name": "ORDER_ID", "potential_column_ids": [{"column_id": "ORDERS_ORDER_ID"}]},
              {"column_name": "MYSTERY", "potential_column_ids": []}
            ]}}"#,
    )
    .unwrap();
    let report = tmp.path().join("report.json");
    let (stdout, stderr, ok) = run_sgraph(
        &config,
        &[
            "link-columns",
            dataset.to_str().unwrap(),
            "--output",
            report.to_str().unwrap(),
        ],
    );
    assert!(ok, "link-columns failed: {}", stderr);
    assert!(stdout.contains("direct matches:        1"), "stdout: {}", stdout);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report["relationships_created"], 1);
    assert_eq!(report["unresolved"][0]["column"], "MYSTERY");
}

#[test]
fn test_link_columns_missing_dataset_fails() {
    let (tmp, config) = loaded_env();
    let missing = tmp.path().join("absent.json");
    let (_, _, ok) = run_sgraph(&config, &["link-columns", missing.to_str().unwrap()]);
    assert!(!ok);
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config) = loaded_env();
    let (_, stderr, ok) = run_sgraph(&config, &["embed", "pending"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_sgraph(&tmp.path().join("nope.toml"), &["info"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
