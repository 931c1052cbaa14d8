#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use rusqlite::Connection;
use sediment::config::SedimentConfig;
use sediment::storage::Graph;
use sediment::types::{Flags, ScalarValue};
use serde_json::Value;
use tempfile::TempDir;

const CONTEXTS: &str = r#"
[[context]]
id = 1
name = "person"
kind = "entity"

[[context]]
id = 2
name = "email"
kind = "alias"

[[context]]
id = 3
name = "knows"
kind = "relationship"
"#;

struct Env {
    dir: TempDir,
    config: PathBuf,
    db: PathBuf,
}

fn write_config(dir: &Path, db: &Path) -> PathBuf {
    let config = dir.join("sediment.toml");
    let text = format!(
        "[store]\npath = {:?}\nshard_bits = 4\nshard = 2\n{CONTEXTS}",
        db.display().to_string()
    );
    fs::write(&config, text).expect("write config");
    config
}

fn setup(name: &str) -> Env {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join(format!("{name}.db"));
    let config = write_config(dir.path(), &db);
    Env { dir, config, db }
}

fn seed(env: &Env) -> sediment::Result<()> {
    let opts = SedimentConfig::load(&env.config)?.to_options()?;
    let graph = Graph::open(&env.db, opts)?;
    let person = graph.contexts().entity(1u16)?;
    let email = graph.contexts().alias(2u16)?;
    let knows = graph.contexts().relationship(3u16)?;
    graph.write(|tx| {
        let alice = graph.create_entity(tx, person, Flags::EMPTY)?.id;
        let bob = graph.create_entity(tx, person, Flags::EMPTY)?.id;
        graph.add_alias(tx, alice, email, None, "alice@example.org")?;
        graph.link(tx, alice, bob, knows, Some(ScalarValue::Int(7)))?;
        Ok(())
    })
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn init_creates_then_reopens() {
    let env = setup("init");
    let first = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .arg("init")
        .arg(&env.db)
        .assert()
        .success()
        .get_output()
        .clone();
    assert!(String::from_utf8_lossy(&first.stdout).starts_with("Created store at"));
    assert!(env.db.exists());

    let second = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .arg("init")
        .assert()
        .success()
        .get_output()
        .clone();
    assert!(String::from_utf8_lossy(&second.stdout).starts_with("Opened existing store at"));
}

#[test]
fn init_reports_layout_as_json() {
    let env = setup("init-json");
    let output = cargo_bin_cmd!("sediment")
        .env("SEDIMENT_CONFIG", &env.config)
        .args(["--format", "json", "init"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["created"], Value::Bool(true));
    assert_eq!(json["shard_bits"], 4);
    assert_eq!(json["shard"], 2);
    assert_eq!(json["contexts"], 3);
}

#[test]
fn stats_emits_json() {
    let env = setup("stats");
    seed(&env).expect("seed store");
    let output = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .args(["--format", "json", "stats"])
        .arg(&env.db)
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["store"]["contexts_declared"], 3);
    assert!(json["store"]["ids_remaining"].is_number());
    let tables = json["tables"].as_array().expect("tables array");
    let relationship = tables
        .iter()
        .find(|t| t["table"] == "relationship")
        .expect("relationship row");
    assert_eq!(relationship["current"], 2);
    let contexts = json["contexts"].as_array().expect("contexts array");
    assert!(contexts
        .iter()
        .any(|c| c["name"] == "email" && c["kind"] == "alias"));
    assert!(json["filesystem"]["db_size_bytes"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn stats_text_lists_tables() {
    let env = setup("stats-text");
    seed(&env).expect("seed store");
    let output = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .arg("stats")
        .assert()
        .success()
        .get_output()
        .clone();
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.starts_with("Store: schema_version="));
    assert!(text.contains("Tables:"));
    assert!(text.contains("alias_lookup"));
    assert!(text.contains("person (entity, id=1): current=2"));
}

#[test]
fn verify_full_succeeds() {
    let env = setup("verify");
    seed(&env).expect("seed store");
    let output = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .args(["--format", "json", "verify", "--level", "full"])
        .arg(&env.db)
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert!(json["success"].as_bool().unwrap_or(false));
    assert_eq!(json["level"], "Full");
}

#[test]
fn verify_exits_with_two_on_findings() {
    let env = setup("verify-broken");
    seed(&env).expect("seed store");
    let conn = Connection::open(&env.db).expect("open raw");
    conn.execute("DELETE FROM relationship WHERE forward = 0", [])
        .expect("drop backward row");
    drop(conn);

    // The fast level does not pair relationship rows.
    cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .arg("verify")
        .assert()
        .success();

    let output = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .args(["verify", "--level", "full"])
        .assert()
        .code(2)
        .get_output()
        .clone();
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("success=false"));
    assert!(text.contains("- Error: relationship"));
}

#[test]
fn missing_database_fails() {
    let env = setup("missing");
    let output = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&env.config)
        .arg("stats")
        .assert()
        .code(1)
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("database not found"));
    assert!(!env.db.exists());
    drop(env.dir);
}

#[test]
fn database_path_is_required_without_config() {
    let output = cargo_bin_cmd!("sediment")
        .env_remove("SEDIMENT_CONFIG")
        .arg("stats")
        .assert()
        .failure()
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no database given"));
}

#[test]
fn malformed_config_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[store]\nshard_bits = \"many\"\n").expect("write config");
    let output = cargo_bin_cmd!("sediment")
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .code(1)
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to parse config"));
}
