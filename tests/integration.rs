use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const FORECAST: &str = r#"
get_forecast = spell {
    description = "Get the weather forecast for a city",
    parameters = {
        { name = "city", type = "string", required = true },
    },
    cast = function(args, ctx)
        return { city = args.city, days = args.days, from = ctx.collection }
    end,
}
"#;

fn magetools_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("magetools");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let weather = root.join("spells").join("weather");
    fs::create_dir_all(&weather).unwrap();
    fs::write(weather.join("forecast.lua"), FORECAST).unwrap();

    let config_content = format!(
        r#"[grimorium]
root = "{root}/spells"
load_timeout_secs = 2

[store]
backend = "sqlite"
path = "{root}/data/index.sqlite"

[sync]
max_retries = 0
"#,
        root = root.display()
    );

    let config_path = root.join("magetools.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_magetools(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = magetools_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run magetools binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn spells_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().join("spells")
}

#[test]
fn test_scan_lists_spells() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_magetools(&config_path, &["scan"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Discovered 1 spell(s) in 1 collection(s)"));
    assert!(stdout.contains("+ weather.get_forecast"));
}

#[test]
fn test_scan_with_disabled_embeddings_reports_failure() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_magetools(&config_path, &["scan"]);
    assert!(success, "a failed book must not fail the scan");
    assert!(stdout.contains("failed weather"), "stdout={}", stdout);
}

#[test]
fn test_scan_quarantines_broken_file() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(
        spells_dir(&config_path).join("weather").join("broken.lua"),
        "this is = not lua (",
    )
    .unwrap();

    let (stdout, stderr, success) = run_magetools(&config_path, &["scan"]);
    assert!(success, "scan failed: stderr={}", stderr);
    assert!(stdout.contains("Quarantined 1 file(s)"));
    assert!(stdout.contains("broken.lua"));
    assert!(stdout.contains("+ weather.get_forecast"));
}

#[test]
fn test_scan_missing_root_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    fs::remove_dir_all(spells_dir(&config_path)).unwrap();

    let (stdout, _, success) = run_magetools(&config_path, &["scan"]);
    assert!(success);
    assert!(stdout.contains("Discovered 0 spell(s) in 0 collection(s)"));
}

#[test]
fn test_cast_prints_result() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_magetools(
        &config_path,
        &["cast", "weather.get_forecast", "--param", "city=Oslo", "--param", "days=3"],
    );
    assert!(success, "cast failed: stdout={}, stderr={}", stdout, stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(value["result"]["city"], "Oslo");
    assert_eq!(value["result"]["days"], 3);
    assert_eq!(value["result"]["from"], "weather");
}

#[test]
fn test_cast_unknown_spell_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_magetools(&config_path, &["cast", "weather.nope"]);
    assert!(!success);
    assert!(stdout.contains("not found"), "stdout={}", stdout);
}

#[test]
fn test_cast_outside_allowed_collections_denied() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_magetools(
        &config_path,
        &["cast", "weather.get_forecast", "--collection", "other"],
    );
    assert!(!success);
    assert!(stdout.contains("Permission denied"), "stdout={}", stdout);
}

#[test]
fn test_search_without_embeddings_finds_nothing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_magetools(&config_path, &["search", "weather forecast"]);
    assert!(success);
    assert!(stdout.contains("No spells found."));
}

#[test]
fn test_search_rejects_bad_threshold() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_magetools(&config_path, &["search", "x", "--threshold", "7"]);
    assert!(!success);
}

#[test]
fn test_init_writes_manifest() {
    let (_tmp, config_path) = setup_test_env();
    let weather = spells_dir(&config_path).join("weather");
    let dir = weather.to_str().unwrap();

    let (stdout, stderr, success) = run_magetools(&config_path, &["init", dir]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("manifest.json"));

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(weather.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["description"], "Collection: weather");

    let (_, stderr, success) = run_magetools(&config_path, &["init", dir]);
    assert!(!success);
    assert!(stderr.contains("already exists"));

    let (_, _, success) = run_magetools(&config_path, &["init", dir, "--force"]);
    assert!(success);
}

#[test]
fn test_new_scaffolds_loadable_spell() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_magetools(&config_path, &["new", "tools", "echo_text"]);
    assert!(success, "new failed: {}", stderr);
    assert!(stdout.contains("echo_text.lua"));
    assert!(spells_dir(&config_path).join("tools").join("echo_text.lua").is_file());

    let (stdout, _, _) = run_magetools(&config_path, &["scan"]);
    assert!(stdout.contains("+ tools.echo_text"), "stdout={}", stdout);

    let (_, _, success) = run_magetools(&config_path, &["new", "tools", "echo_text"]);
    assert!(!success, "scaffolding twice must fail");
}

#[test]
fn test_hash_is_stable_and_ignores_private_files() {
    let (_tmp, config_path) = setup_test_env();
    let weather = spells_dir(&config_path).join("weather");
    let dir = weather.to_str().unwrap();

    let (first, _, success) = run_magetools(&config_path, &["hash", dir]);
    assert!(success);
    assert_eq!(first.trim().len(), 64);

    fs::write(weather.join("_private.lua"), "x = 1").unwrap();
    let (second, _, _) = run_magetools(&config_path, &["hash", dir]);
    assert_eq!(first, second);

    fs::write(weather.join("forecast.lua"), "-- changed").unwrap();
    let (third, _, _) = run_magetools(&config_path, &["hash", dir]);
    assert_ne!(first, third);
}

#[test]
fn test_hash_empty_dir() {
    let (tmp, config_path) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    let (stdout, _, success) = run_magetools(&config_path, &["hash", empty.to_str().unwrap()]);
    assert!(success);
    assert_eq!(
        stdout.trim(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_magetools(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("magetools"));
}
