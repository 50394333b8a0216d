//! Scenario: `judge config hash` and `judge config validate` against a
//! layered language-profile YAML config written to a temp directory.
//!
//! No database required — these subcommands only touch the filesystem.

use assert_cmd::prelude::*;
use predicates::prelude::*;

const BASE_YAML: &str = r#"
outbox:
  poll_interval_ms: 1000
  batch_size: 50
language_profiles:
  - code: "cpp17"
    display_name: "C++17"
    version: "gcc-12"
    compile_template: ["g++", "-O2", "-o", "a.out", "main.cpp"]
    run_template: ["./a.out"]
    source_filename: "main.cpp"
    binary_filename: "a.out"
    overhead_wall_ms: 50
    overhead_memory_kb: 4096
  - code: "python3"
    display_name: "Python 3"
    version: "3.11"
    compile_template: []
    run_template: ["python3", "main.py"]
    source_filename: "main.py"
    binary_filename: ""
    overhead_wall_ms: 100
    overhead_memory_kb: 8192
"#;

const OVERLAY_YAML: &str = r#"
outbox:
  poll_interval_ms: 2000
"#;

const DUPLICATE_CODE_YAML: &str = r#"
language_profiles:
  - code: "cpp17"
    display_name: "C++17"
    version: "gcc-12"
    compile_template: ["g++", "-O2", "-o", "a.out", "main.cpp"]
    run_template: ["./a.out"]
    source_filename: "main.cpp"
    binary_filename: "a.out"
    overhead_wall_ms: 50
    overhead_memory_kb: 4096
  - code: "cpp17"
    display_name: "C++17 again"
    version: "gcc-13"
    compile_template: []
    run_template: ["./a.out"]
    source_filename: "main.cpp"
    binary_filename: "a.out"
    overhead_wall_ms: 50
    overhead_memory_kb: 4096
"#;

fn write_layer(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn config_hash_is_stable_across_two_identical_invocations() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = write_layer(&dir, "base.yaml", BASE_YAML);

    let mut cmd1 = assert_cmd::Command::cargo_bin("judge")?;
    let out1 = cmd1.args(["config", "hash", &base]).output()?;
    assert!(out1.status.success());

    let mut cmd2 = assert_cmd::Command::cargo_bin("judge")?;
    let out2 = cmd2.args(["config", "hash", &base]).output()?;
    assert!(out2.status.success());

    assert_eq!(out1.stdout, out2.stdout, "hashing the same layer twice must be stable");
    Ok(())
}

#[test]
fn config_hash_merges_layers_in_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = write_layer(&dir, "base.yaml", BASE_YAML);
    let overlay = write_layer(&dir, "overlay.yaml", OVERLAY_YAML);

    let mut base_only = assert_cmd::Command::cargo_bin("judge")?;
    let base_only_out = base_only.args(["config", "hash", &base]).output()?;

    let mut merged = assert_cmd::Command::cargo_bin("judge")?;
    let merged_out = merged.args(["config", "hash", &base, &overlay]).output()?;

    assert!(base_only_out.status.success());
    assert!(merged_out.status.success());
    assert_ne!(
        base_only_out.stdout, merged_out.stdout,
        "applying an overlay layer must change the resulting config hash"
    );
    Ok(())
}

#[test]
fn config_validate_reports_every_registered_language() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = write_layer(&dir, "base.yaml", BASE_YAML);

    let mut cmd = assert_cmd::Command::cargo_bin("judge")?;
    cmd.args(["config", "validate", &base])
        .assert()
        .success()
        .stdout(predicate::str::contains("language_profiles=2"))
        .stdout(predicate::str::contains("cpp17"))
        .stdout(predicate::str::contains("python3"));
    Ok(())
}

#[test]
fn config_validate_rejects_duplicate_language_codes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dup = write_layer(&dir, "dup.yaml", DUPLICATE_CODE_YAML);

    let mut cmd = assert_cmd::Command::cargo_bin("judge")?;
    cmd.args(["config", "validate", &dup]).assert().failure();
    Ok(())
}
