mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use common::*;

fn cbt2git_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cbt2git"))
}

fn archive() -> Vec<u8> {
    let inner = pds_xmit(
        "SYS1.INNER.PDS",
        RECFM_FB,
        80,
        &[MemberSpec::text("HELLO", &["HELLO"])],
    );
    let top = pds_xmit(
        "CBT.CBT007.FILE007",
        RECFM_FB,
        80,
        &[
            MemberSpec::text("@FILE007", &["FILE 007 DOCUMENTATION"]).with_stats(ispf_stats()),
            MemberSpec::raw("INNER", inner),
        ],
    );
    distribution("FILE007.XMI", &top)
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let stage = root.join("stage");
    fs::create_dir_all(&stage).unwrap();
    fs::write(stage.join("CBT007.zip"), archive()).unwrap();
    fs::write(stage.join("CBT008.zip"), b"garbage").unwrap();
    fs::write(stage.join("README.txt"), b"not an archive").unwrap();

    let config_content = format!(
        r#"[paths]
stage = "{root}/stage"
cbtfiles = "{root}/cbtfiles"
repos = "{root}/repos"
batch_log = "{root}/cbt2git.log"

[db]
path = "{root}/data/cbt2git.sqlite"

[git]
enabled = false
"#,
        root = root.display()
    );

    let config_path = config_dir.join("cbt2git.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cbt2git(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cbt2git_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cbt2git binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cbt2git(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_cbt2git(&config_path, &["init"]);
    assert!(success, "second init failed");
}

#[test]
fn test_unpack_without_config() {
    let tmp = TempDir::new().unwrap();
    let zip_path = tmp.path().join("cbt007.zip");
    fs::write(&zip_path, archive()).unwrap();
    let out = tmp.path().join("out");

    let (stdout, stderr, success) = run_cbt2git(
        &tmp.path().join("missing.toml"),
        &["unpack", zip_path.to_str().unwrap(), "--into", out.to_str().unwrap()],
    );
    assert!(success, "unpack failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("unpack CBT007"));
    assert!(stdout.contains("dataset: FILE007 PO FB 80 800"));
    assert!(stdout.contains("ok"));

    let root = out.join("CBT007");
    assert_eq!(read(&root.join("FILE007/@FILE007")), "FILE 007 DOCUMENTATION\n");
    assert_eq!(read(&root.join("INNER.PDS/HELLO")), "HELLO\n");
    assert!(root.join("INNER.xmi").exists());
    assert!(root.join("cbt2git.log").exists());
}

#[test]
fn test_unpack_rejects_garbage() {
    let tmp = TempDir::new().unwrap();
    let zip_path = tmp.path().join("CBT008.zip");
    fs::write(&zip_path, b"garbage").unwrap();

    let (_, stderr, success) = run_cbt2git(
        &tmp.path().join("missing.toml"),
        &["unpack", zip_path.to_str().unwrap(), "--into", tmp.path().to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("unsupported container"));
}

#[test]
fn test_convert_skips_bad_archives_and_is_incremental() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (stdout, stderr, success) = run_cbt2git(&config_path, &["convert"]);
    assert!(success, "convert failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("archives staged: 2"));
    assert!(stdout.contains("converted: 1"));
    assert!(stdout.contains("skipped: 1"));
    assert!(root.join("repos/CBT007/FILE007/@FILE007").exists());
    assert!(!root.join("repos/CBT008").exists());
    assert!(root.join("cbtfiles/CBT007.zip").exists());

    let batch_log = read(&root.join("cbt2git.log"));
    assert!(batch_log.contains(" - CBT007 - "));
    assert!(batch_log.contains(" - CBT008 - Skipped CBT008"));

    // unchanged stage: nothing to do
    let (stdout, _, success) = run_cbt2git(&config_path, &["convert"]);
    assert!(success);
    assert!(stdout.contains("unchanged: 2"));
    assert!(stdout.contains("converted: 0"));
}

#[test]
fn test_scan_exports_json() {
    let (tmp, config_path) = setup_test_env();
    let export = tmp.path().join("catalog.json");

    let (stdout, stderr, success) = run_cbt2git(
        &config_path,
        &["scan", "--output", export.to_str().unwrap()],
    );
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("archives: 2"));
    assert!(stdout.contains("rows stored: 4"));

    let json: serde_json::Value = serde_json::from_str(&read(&export)).unwrap();
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["member_name"], "@FILE007");
    assert_eq!(rows[1]["subcontent"], "XMIT");
    assert_eq!(rows[2]["dataset_name"], "SYS1.INNER.PDS");
    assert_eq!(rows[3]["dataset_name"], "NO CONTAINER");
}

#[test]
fn test_scan_only_one_archive() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_cbt2git(&config_path, &["scan", "--only", "7"]);
    assert!(success);
    assert!(stdout.contains("archives: 1"));
    assert!(stdout.contains("rows stored: 3"));
}
