use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

fn ihx_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ihx"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ihx.sqlite"

[retrieval]
top_k = 5

[routing]
conf_min = 0.65
conf_auto = 0.80

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );
    let config_path = config_dir.join("ihx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ihx(config: &PathBuf, args: &[&str]) -> Output {
    Command::new(ihx_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ihx")
}

#[test]
fn init_creates_database_and_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let first = run_ihx(&config, &["init"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(tmp.path().join("data/ihx.sqlite").exists());

    let second = run_ihx(&config, &["init"]);
    assert!(second.status.success());
}

#[test]
fn runs_list_on_empty_database() {
    let (_tmp, config) = setup_test_env();
    assert!(run_ihx(&config, &["init"]).status.success());

    let out = run_ihx(&config, &["runs", "list", "--limit", "10"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("No runs."));
}

#[test]
fn runs_get_missing_fails() {
    let (_tmp, config) = setup_test_env();
    assert!(run_ihx(&config, &["init"]).status.success());

    let out = run_ihx(&config, &["runs", "get", "7"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found: run 7"));
}

#[test]
fn runs_list_rejects_bad_limit() {
    let (_tmp, config) = setup_test_env();
    let out = run_ihx(&config, &["runs", "list", "--limit", "500"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("limit must be between 1 and 200"));
}

#[test]
fn search_without_embedder_fails_cleanly() {
    let (_tmp, config) = setup_test_env();
    assert!(run_ihx(&config, &["init"]).status.success());

    let out = run_ihx(&config, &["search", "auth 401"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("embedder unavailable"));
}

#[test]
fn invalid_thresholds_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("ihx.toml");
    fs::write(
        &config,
        format!(
            "[db]\npath = \"{}/ihx.sqlite\"\n\n[routing]\nconf_min = 0.9\nconf_auto = 0.5\n\n[server]\nbind = \"127.0.0.1:7342\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let out = run_ihx(&config, &["init"]);
    assert!(!out.status.success());
}
