//! Language Profile Registry (§4.1, §6): the catalogue of supported
//! languages, each carrying its compile/run argv templates and resource
//! overhead. Loaded once at startup from the layered YAML config and held
//! read-only for the life of the process — there is no runtime
//! registration path, unlike a dynamic plugin model, because language
//! support is an operator deploy-time decision, not a per-submission one.

use std::collections::BTreeMap;

use judge_config::LoadedConfig;
use judge_schemas::LanguageProfile;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateCode { code: String },
    UnknownLanguage { code: String },
    EmptyCode,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateCode { code } => write!(f, "language '{code}' is already registered"),
            RegistryError::UnknownLanguage { code } => write!(f, "no language profile registered for '{code}'"),
            RegistryError::EmptyCode => write!(f, "language code must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Catalogue of [`LanguageProfile`]s keyed by `code` (e.g. `"cpp17"`,
/// `"python3"`). Insertion order is preserved in [`ProfileRegistry::list`]
/// for deterministic `/v1/languages` responses.
pub struct ProfileRegistry {
    order: Vec<String>,
    by_code: BTreeMap<String, LanguageProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            by_code: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, profile: LanguageProfile) -> Result<(), RegistryError> {
        if profile.code.trim().is_empty() {
            return Err(RegistryError::EmptyCode);
        }
        if self.by_code.contains_key(&profile.code) {
            return Err(RegistryError::DuplicateCode { code: profile.code });
        }
        self.order.push(profile.code.clone());
        self.by_code.insert(profile.code.clone(), profile);
        Ok(())
    }

    /// Build a registry from the `language_profiles` array of an
    /// already-loaded layered config (§6 `JUDGE_CONFIG_PATHS`).
    pub fn from_loaded_config(loaded: &LoadedConfig) -> anyhow::Result<Self> {
        let profiles = judge_config::parse_language_profiles(loaded)?;
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(profile).map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Ok(registry)
    }

    pub fn lookup(&self, code: &str) -> Result<&LanguageProfile, RegistryError> {
        self.by_code.get(code).ok_or_else(|| RegistryError::UnknownLanguage { code: code.to_string() })
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn list(&self) -> Vec<&LanguageProfile> {
        self.order.iter().filter_map(|code| self.by_code.get(code)).collect()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `{source}`/`{binary}` placeholders in a compile or run argv
/// template (§4.1 "each profile's compile/run commands are parameterized").
/// Unknown placeholders are left verbatim rather than erroring: a profile
/// author can reference `{binary}` in a `run_template` with no matching
/// `{source}`, and vice versa in an interpreted language's `compile_template`
/// (which is empty in practice, but the substitution itself stays generic).
pub fn render_template(template: &[String], source_filename: &str, binary_filename: Option<&str>) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            let arg = arg.replace("{source}", source_filename);
            match binary_filename {
                Some(binary) => arg.replace("{binary}", binary),
                None => arg,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpp_profile() -> LanguageProfile {
        LanguageProfile {
            code: "cpp17".to_string(),
            display_name: "C++17".to_string(),
            version: "g++ 12".to_string(),
            compile_template: vec![
                "g++".to_string(),
                "-O2".to_string(),
                "-std=c++17".to_string(),
                "-o".to_string(),
                "{binary}".to_string(),
                "{source}".to_string(),
            ],
            run_template: vec!["./{binary}".to_string()],
            source_filename: "main.cpp".to_string(),
            binary_filename: Some("main".to_string()),
            overhead_wall_ms: 50,
            overhead_memory_kb: 8192,
        }
    }

    fn python_profile() -> LanguageProfile {
        LanguageProfile {
            code: "python3".to_string(),
            display_name: "Python 3".to_string(),
            version: "3.11".to_string(),
            compile_template: Vec::new(),
            run_template: vec!["python3".to_string(), "{source}".to_string()],
            source_filename: "main.py".to_string(),
            binary_filename: None,
            overhead_wall_ms: 100,
            overhead_memory_kb: 16384,
        }
    }

    #[test]
    fn register_and_lookup_round_trips() {
        let mut reg = ProfileRegistry::new();
        reg.register(cpp_profile()).unwrap();
        let found = reg.lookup("cpp17").unwrap();
        assert_eq!(found.display_name, "C++17");
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let mut reg = ProfileRegistry::new();
        reg.register(cpp_profile()).unwrap();
        let err = reg.register(cpp_profile());
        assert_eq!(err, Err(RegistryError::DuplicateCode { code: "cpp17".to_string() }));
    }

    #[test]
    fn unknown_language_errors() {
        let reg = ProfileRegistry::new();
        let err = reg.lookup("rust2021");
        assert_eq!(err, Err(RegistryError::UnknownLanguage { code: "rust2021".to_string() }));
    }

    #[test]
    fn list_preserves_insertion_order() {
        let mut reg = ProfileRegistry::new();
        reg.register(cpp_profile()).unwrap();
        reg.register(python_profile()).unwrap();
        let codes: Vec<&str> = reg.list().iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, ["cpp17", "python3"]);
    }

    #[test]
    fn render_template_substitutes_source_and_binary() {
        let profile = cpp_profile();
        let argv = render_template(&profile.compile_template, &profile.source_filename, profile.binary_filename.as_deref());
        assert_eq!(argv, vec!["g++", "-O2", "-std=c++17", "-o", "main", "main.cpp"]);
    }

    #[test]
    fn render_template_without_binary_only_substitutes_source() {
        let profile = python_profile();
        let argv = render_template(&profile.run_template, &profile.source_filename, profile.binary_filename.as_deref());
        assert_eq!(argv, vec!["python3", "main.py"]);
    }

    #[test]
    fn empty_code_is_rejected() {
        let mut reg = ProfileRegistry::new();
        let mut profile = cpp_profile();
        profile.code = "  ".to_string();
        let err = reg.register(profile);
        assert_eq!(err, Err(RegistryError::EmptyCode));
    }
}
