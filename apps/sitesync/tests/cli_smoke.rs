use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::tempdir;

fn cmd() -> std::process::Command {
    std::process::Command::new(assert_cmd::cargo::cargo_bin!("sitesync"))
}

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let db_path = dir.join("sitesync.sqlite");
    let config_path = dir.join("sitesync.toml");
    let config = format!(
        r#"
default_source = "docs"

[storage]
path = "{}"

[crawler]
parallel_agents = 2
backoff_base_seconds = 0.0
jitter_fraction = 0.0

[[sources]]
name = "docs"
start_urls = ["https://example.com/a", "https://example.com/b"]
fetcher = "null"
max_depth = 0
"#,
        db_path.display()
    );
    std::fs::write(&config_path, config).expect("write config");
    config_path
}

#[test]
fn help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("crawl"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("runs"))
        .stdout(predicate::str::contains("sources"));
}

#[test]
fn status_without_runs_reports_cleanly() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path());
    cmd()
        .args(["--config", config.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded"));
}

#[test]
fn crawl_with_null_fetcher_completes_and_status_reflects_it() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "--quiet", "crawl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("finished=2"));

    cmd()
        .args(["--config", config.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("status completed"))
        .stdout(predicate::str::contains("assets: 2"));

    cmd()
        .args(["--config", config.to_str().unwrap(), "runs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("status=completed"));

    cmd()
        .args(["--config", config.to_str().unwrap(), "sources"])
        .assert()
        .success()
        .stdout(predicate::str::contains("docs"))
        .stdout(predicate::str::contains("last run"));
}

#[test]
fn unknown_source_fails_with_a_clear_error() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path());
    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "crawl",
            "--source",
            "nope",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not defined"));
}
