use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn trove_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("trove");
    path
}

fn setup_test_env(dataset_exists: bool) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    if dataset_exists {
        let food = root.join("datasets/food");
        fs::create_dir_all(&food).unwrap();
        fs::write(food.join("menu.csv"), "Item,Price\nRamen,12\n").unwrap();
    }

    let config_content = format!(
        r#"[db]
path = "{0}/data/trove.sqlite"

[dataset]
root = "{0}/datasets"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("trove.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_trove(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = trove_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run trove binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env(true);
    let (stdout, _, code) = run_trove(&config, &["init"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/trove.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env(true);
    let (_, _, first) = run_trove(&config, &["init"]);
    let (_, _, second) = run_trove(&config, &["init"]);
    assert_eq!(first, Some(0));
    assert_eq!(second, Some(0));
}

#[test]
fn test_missing_dataset_root_exits_1() {
    let (_tmp, config) = setup_test_env(false);
    let (_, stderr, code) = run_trove(&config, &["ingest"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("dataset root"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_exits_1() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, code) = run_trove(&tmp.path().join("nope.toml"), &["ingest"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("config"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_exits_1() {
    let (_tmp, config) = setup_test_env(true);
    let mut content = fs::read_to_string(&config).unwrap();
    content.push_str("\n[classification]\nmargin = 3.0\n");
    fs::write(&config, content).unwrap();
    let (_, stderr, code) = run_trove(&config, &["init"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("margin"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_without_embeddings_exits_1() {
    let (_tmp, config) = setup_test_env(true);
    let (_, stderr, code) = run_trove(&config, &["ingest", "--mode", "reset"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("embedding provider"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_mode_rejected() {
    let (_tmp, config) = setup_test_env(true);
    let (_, _, code) = run_trove(&config, &["ingest", "--mode", "partial"]);
    assert_ne!(code, Some(0));
}
