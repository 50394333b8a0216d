//! Config hash stability for the layered language-profile registry.
//!
//! - `load_layered_yaml_from_strings` called twice on the same inputs returns
//!   identical config_hash.
//! - Reordering keys within YAML doesn't change the hash (canonicalization).
//! - Different values produce different hashes.
//! - Multiple merge layers produce a stable hash.

use judge_config::load_layered_yaml_from_strings;

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
"#;

/// Same content as BASE_YAML but with keys in different order.
const BASE_YAML_REORDERED: &str = r#"
language_profiles:
  - binary_filename: "a.out"
    code: "cpp17"
    compile_template: ["g++", "-O2", "-o", "a.out", "main.cpp"]
    display_name: "C++17"
    overhead_memory_kb: 4096
    overhead_wall_ms: 50
    run_template: ["./a.out"]
    source_filename: "main.cpp"
    version: "gcc-12"
outbox:
  batch_size: 50
  poll_interval_ms: 1000
"#;

const OVERLAY_YAML: &str = r#"
outbox:
  poll_interval_ms: 2000
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();

    assert_eq!(
        a.config_hash, b.config_hash,
        "same YAML input must produce identical hash"
    );
    assert_eq!(
        a.canonical_json, b.canonical_json,
        "canonical JSON must be identical for same input"
    );
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();

    assert_eq!(
        original.config_hash, reordered.config_hash,
        "reordering keys in YAML must not change the hash (canonicalization)"
    );
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();

    let modified = r#"
outbox:
  poll_interval_ms: 5000
  batch_size: 200
"#;
    let b = load_layered_yaml_from_strings(&[modified]).unwrap();

    assert_ne!(
        a.config_hash, b.config_hash,
        "different config values must produce different hashes"
    );
}

#[test]
fn merged_layers_produce_stable_hash_and_apply_overlay() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);

    let poll_ms = a
        .config_json
        .pointer("/outbox/poll_interval_ms")
        .and_then(|v| v.as_i64())
        .unwrap();
    assert_eq!(poll_ms, 2000, "overlay should override base poll_interval_ms");
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();

    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn empty_config_produces_stable_hash() {
    let a = load_layered_yaml_from_strings(&["{}"]).unwrap();
    let b = load_layered_yaml_from_strings(&["{}"]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn parses_language_profiles_from_loaded_config() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let profiles = judge_config::parse_language_profiles(&loaded).unwrap();

    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].code, "cpp17");
    assert_eq!(profiles[0].run_template, vec!["./a.out".to_string()]);
}
