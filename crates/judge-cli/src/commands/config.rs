//! `judge config` subcommands: layered language-profile config inspection.

use anyhow::Result;
use std::path::Path;

/// Merge the given YAML layers (e.g. a base `language_profiles.yaml`
/// overridden per-environment) and print the resulting hash + canonical
/// JSON, the way an operator would diff what two deploys actually loaded.
pub fn hash(paths: &[String]) -> Result<()> {
    let path_refs: Vec<&Path> = paths.iter().map(|p| Path::new(p.as_str())).collect();
    let loaded = judge_config::load_layered_yaml(&path_refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

/// Load the given layers and report how many language profiles they
/// resolve to, failing on duplicate/empty codes exactly as the registry
/// the worker pool boots would.
pub fn validate(paths: &[String]) -> Result<()> {
    let path_refs: Vec<&Path> = paths.iter().map(|p| Path::new(p.as_str())).collect();
    let loaded = judge_config::load_layered_yaml(&path_refs)?;
    let registry = judge_profiles::ProfileRegistry::from_loaded_config(&loaded)?;

    println!("config_hash={}", loaded.config_hash);
    println!("language_profiles={}", registry.len());
    for profile in registry.list() {
        println!("  {} ({}) — {}", profile.code, profile.version, profile.display_name);
    }
    Ok(())
}
