//! Resource Validator (§4.5): guards a submission against entering the
//! judge pipeline with an unsupported language, oversized code, or a
//! problem the content service doesn't recognize, before any sandbox
//! resources are spent on it.
//!
//! The pure `validate_*` checks are deterministic and side-effect free,
//! mirroring the teacher's risk-engine shape: small composable guards, a
//! closed reason-code enum, and one combinator that runs every guard in a
//! fixed order so the failure reported is always the first one tripped.
//! [`ContentServiceClient`] is the one IO seam — fetching per-problem test
//! case metadata over HTTP — cached for the lifetime of a single submission
//! judgement only (§4.5 "caches ... for a single submission judgement").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use judge_profiles::ProfileRegistry;
use judge_schemas::ProblemMetadata;

/// Default byte limit on submitted source code (§4.5).
pub const DEFAULT_MAX_CODE_BYTES: u64 = 1_048_576;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    UnknownLanguage { code: String },
    CodeTooLarge { bytes: u64, limit: u64 },
    UnknownProblem { problem_id: i64 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::UnknownLanguage { code } => write!(f, "unsupported language: {code}"),
            ValidationError::CodeTooLarge { bytes, limit } => {
                write!(f, "code size {bytes} bytes exceeds limit of {limit} bytes")
            }
            ValidationError::UnknownProblem { problem_id } => write!(f, "unknown problem id {problem_id}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Reject unless `language` is in the static [`ProfileRegistry`].
pub fn validate_language(registry: &ProfileRegistry, language: &str) -> Result<(), ValidationError> {
    if registry.contains(language) {
        Ok(())
    } else {
        Err(ValidationError::UnknownLanguage { code: language.to_string() })
    }
}

/// Reject source code over `limit` bytes.
pub fn validate_code_size(code_bytes: u64, limit: u64) -> Result<(), ValidationError> {
    if code_bytes <= limit {
        Ok(())
    } else {
        Err(ValidationError::CodeTooLarge { bytes: code_bytes, limit })
    }
}

/// Reject a submission whose target problem the content service doesn't
/// recognize (an empty test-case list stands in for "not found").
pub fn validate_problem_exists(metadata: &ProblemMetadata) -> Result<(), ValidationError> {
    if metadata.test_cases.is_empty() {
        Err(ValidationError::UnknownProblem { problem_id: metadata.problem_id })
    } else {
        Ok(())
    }
}

/// Run every guard in order, returning the first failure.
pub fn validate_submission(
    registry: &ProfileRegistry,
    language: &str,
    code_bytes: u64,
    max_code_bytes: u64,
    metadata: &ProblemMetadata,
) -> Result<(), ValidationError> {
    validate_language(registry, language)?;
    validate_code_size(code_bytes, max_code_bytes)?;
    validate_problem_exists(metadata)?;
    Ok(())
}

/// The one IO seam of the Resource Validator: fetching a problem's test
/// cases and limits from the content service (§4.5). A trait so workers can
/// be tested against a fixed in-memory catalogue instead of a live HTTP
/// dependency.
#[async_trait]
pub trait ContentServiceClient: Send + Sync {
    async fn fetch_problem_metadata(&self, problem_id: i64) -> anyhow::Result<ProblemMetadata>;
}

/// HTTP-backed [`ContentServiceClient`] (§4.5 "reads problem metadata ... via
/// HTTP").
pub struct HttpContentServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpContentServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ContentServiceClient for HttpContentServiceClient {
    async fn fetch_problem_metadata(&self, problem_id: i64) -> anyhow::Result<ProblemMetadata> {
        let url = format!("{}/v1/problems/{problem_id}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let metadata = response.json::<ProblemMetadata>().await?;
        Ok(metadata)
    }
}

/// Wraps a [`ContentServiceClient`] with a cache scoped to a single
/// submission judgement (§4.5): the same problem is fetched at most once
/// per judgement, however many tests or retries touch it.
pub struct JudgementScopedCache<'a> {
    client: &'a dyn ContentServiceClient,
    cache: Mutex<HashMap<i64, ProblemMetadata>>,
}

impl<'a> JudgementScopedCache<'a> {
    pub fn new(client: &'a dyn ContentServiceClient) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn fetch_problem_metadata(&self, problem_id: i64) -> anyhow::Result<ProblemMetadata> {
        if let Some(cached) = self.cache.lock().unwrap().get(&problem_id) {
            return Ok(cached.clone());
        }

        let metadata = self.client.fetch_problem_metadata(problem_id).await?;
        self.cache.lock().unwrap().insert(problem_id, metadata.clone());
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judge_schemas::{LanguageProfile, TestCase};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_with_cpp() -> ProfileRegistry {
        let mut reg = ProfileRegistry::new();
        reg.register(LanguageProfile {
            code: "cpp17".to_string(),
            display_name: "C++17".to_string(),
            version: "g++ 12".to_string(),
            compile_template: Vec::new(),
            run_template: Vec::new(),
            source_filename: "main.cpp".to_string(),
            binary_filename: Some("main".to_string()),
            overhead_wall_ms: 50,
            overhead_memory_kb: 8192,
        })
        .unwrap();
        reg
    }

    fn metadata_with_tests(problem_id: i64, n: usize) -> ProblemMetadata {
        ProblemMetadata {
            problem_id,
            time_ms: 1000,
            memory_kb: 262144,
            short_circuit: true,
            test_cases: (0..n)
                .map(|i| TestCase {
                    id: i as i64,
                    ordinal: i as i32,
                    input_blob_ref: format!("in-{i}"),
                    output_blob_ref: format!("out-{i}"),
                    time_ms_override: None,
                    memory_kb_override: None,
                    is_sample: false,
                })
                .collect(),
        }
    }

    #[test]
    fn validate_language_accepts_known_language() {
        assert!(validate_language(&registry_with_cpp(), "cpp17").is_ok());
    }

    #[test]
    fn validate_language_rejects_unknown_language() {
        let err = validate_language(&registry_with_cpp(), "brainfuck").unwrap_err();
        assert_eq!(err, ValidationError::UnknownLanguage { code: "brainfuck".to_string() });
    }

    #[test]
    fn validate_code_size_rejects_over_limit() {
        let err = validate_code_size(2_000_000, DEFAULT_MAX_CODE_BYTES).unwrap_err();
        assert_eq!(
            err,
            ValidationError::CodeTooLarge { bytes: 2_000_000, limit: DEFAULT_MAX_CODE_BYTES }
        );
    }

    #[test]
    fn validate_code_size_accepts_at_exactly_the_limit() {
        assert!(validate_code_size(DEFAULT_MAX_CODE_BYTES, DEFAULT_MAX_CODE_BYTES).is_ok());
    }

    #[test]
    fn validate_problem_exists_rejects_empty_test_cases() {
        let err = validate_problem_exists(&metadata_with_tests(7, 0)).unwrap_err();
        assert_eq!(err, ValidationError::UnknownProblem { problem_id: 7 });
    }

    #[test]
    fn validate_submission_reports_the_first_failing_guard() {
        let err = validate_submission(&registry_with_cpp(), "brainfuck", 10, DEFAULT_MAX_CODE_BYTES, &metadata_with_tests(1, 3))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownLanguage { code: "brainfuck".to_string() });
    }

    #[test]
    fn validate_submission_passes_when_every_guard_passes() {
        assert!(validate_submission(&registry_with_cpp(), "cpp17", 10, DEFAULT_MAX_CODE_BYTES, &metadata_with_tests(1, 3)).is_ok());
    }

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentServiceClient for CountingClient {
        async fn fetch_problem_metadata(&self, problem_id: i64) -> anyhow::Result<ProblemMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(metadata_with_tests(problem_id, 2))
        }
    }

    #[tokio::test]
    async fn judgement_scoped_cache_fetches_a_problem_at_most_once() {
        let client = CountingClient { calls: AtomicUsize::new(0) };
        let cache = JudgementScopedCache::new(&client);

        cache.fetch_problem_metadata(42).await.unwrap();
        cache.fetch_problem_metadata(42).await.unwrap();
        cache.fetch_problem_metadata(42).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn judgement_scoped_cache_fetches_each_distinct_problem_once() {
        let client = CountingClient { calls: AtomicUsize::new(0) };
        let cache = JudgementScopedCache::new(&client);

        cache.fetch_problem_metadata(1).await.unwrap();
        cache.fetch_problem_metadata(2).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}
