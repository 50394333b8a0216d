//! Ambient test harness: shared fakes and fixture builders for the scenario
//! tests scattered across every other crate in this workspace, plus this
//! crate's own literal coverage of the named scenarios (§8 "Scenarios") —
//! a submitted program reaching `accepted`, `wrong-answer`, `tle`, `mle`,
//! `compile-error`, and the outbox publisher's retry-then-recover path.
//!
//! Nothing here is wired into a production binary; this crate exists only
//! so `[dev-dependencies]` elsewhere (and this crate's own `tests/`) don't
//! each reinvent a fixed-metadata content-service client or a scripted
//! sandbox report.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use judge_execution::types::{ExitKind, Report};
use judge_queue::{EventPublisher, QueueError};
use judge_risk::ContentServiceClient;
use judge_schemas::{LanguageProfile, OutboxEvent, ProblemMetadata};

/// Connect using `JUDGE_DATABASE_URL` and ensure migrations are applied —
/// the same bootstrap every DB-backed scenario test across this workspace
/// repeats inline; kept here as the one shared copy for this crate's own
/// tests.
pub async fn new_pg_pool() -> Result<PgPool> {
    let url = std::env::var(judge_db::ENV_DATABASE_URL)
        .context("DB tests require JUDGE_DATABASE_URL; run with --include-ignored")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .context("connect to submission store failed")?;
    judge_db::migrate(&pool).await.context("migrate failed")?;
    Ok(pool)
}

/// A minimal compiled-language profile (g++, no interpreter step).
pub fn cpp17_profile() -> LanguageProfile {
    LanguageProfile {
        code: "cpp17".to_string(),
        display_name: "C++17".to_string(),
        version: "gcc-12".to_string(),
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
        overhead_memory_kb: 4096,
    }
}

/// A minimal interpreted-language profile (empty compile template).
pub fn python3_profile() -> LanguageProfile {
    LanguageProfile {
        code: "python3".to_string(),
        display_name: "Python 3".to_string(),
        version: "3.11".to_string(),
        compile_template: vec![],
        run_template: vec!["python3".to_string(), "{source}".to_string()],
        source_filename: "main.py".to_string(),
        binary_filename: None,
        overhead_wall_ms: 100,
        overhead_memory_kb: 8192,
    }
}

/// A [`ContentServiceClient`] that always returns the same fixed
/// [`ProblemMetadata`], for scenario tests that don't exercise the
/// Resource Validator's HTTP leg. Grounded on the fixed-response fake the
/// same seam needed in `judge-runtime`'s own pool-level scenario test;
/// kept here so it isn't copy-pasted into every crate that needs one.
pub struct FixedContentService(pub ProblemMetadata);

#[async_trait]
impl ContentServiceClient for FixedContentService {
    async fn fetch_problem_metadata(&self, _problem_id: i64) -> anyhow::Result<ProblemMetadata> {
        Ok(self.0.clone())
    }
}

/// A successful sandbox report with the given captured stdout.
pub fn ok_report(stdout: &[u8]) -> Report {
    Report {
        exit_kind: ExitKind::Ok,
        exit_code: Some(0),
        signal: None,
        wall_ms: 10,
        cpu_ms: 10,
        peak_memory_kb: 1024,
        stdout: stdout.to_vec(),
        stdout_truncated: false,
        stderr: Vec::new(),
        stderr_truncated: false,
    }
}

/// A wall-clock timeout report (§4.1 "a `run` never exceeds wall-ms + grace
/// by more than grace; on `timeout` the process is killed").
pub fn timeout_report(wall_ms: i64) -> Report {
    Report {
        exit_kind: ExitKind::Timeout,
        exit_code: None,
        signal: None,
        wall_ms,
        cpu_ms: wall_ms,
        peak_memory_kb: 2048,
        stdout: Vec::new(),
        stdout_truncated: false,
        stderr: Vec::new(),
        stderr_truncated: false,
    }
}

/// A memory-limit-overrun report (§4.1 "memory overrun produces `memory`,
/// not `runtime`").
pub fn memory_report(peak_memory_kb: i64) -> Report {
    Report {
        exit_kind: ExitKind::Memory,
        exit_code: None,
        signal: None,
        wall_ms: 200,
        cpu_ms: 200,
        peak_memory_kb,
        stdout: Vec::new(),
        stdout_truncated: false,
        stderr: Vec::new(),
        stderr_truncated: false,
    }
}

/// A nonzero-exit / signal report (classified `runtime-error`).
pub fn crashed_report(signal: Option<i32>) -> Report {
    Report {
        exit_kind: if signal.is_some() { ExitKind::Signal } else { ExitKind::Runtime },
        exit_code: if signal.is_some() { None } else { Some(1) },
        signal,
        wall_ms: 15,
        cpu_ms: 15,
        peak_memory_kb: 1024,
        stdout: Vec::new(),
        stdout_truncated: false,
        stderr: b"segmentation fault".to_vec(),
        stderr_truncated: false,
    }
}

/// A compile step that exits non-zero, carrying the given compiler stderr.
pub fn failed_compile_report(stderr: &[u8]) -> Report {
    Report {
        exit_kind: ExitKind::Runtime,
        exit_code: Some(1),
        signal: None,
        wall_ms: 500,
        cpu_ms: 500,
        peak_memory_kb: 32 * 1024,
        stdout: Vec::new(),
        stdout_truncated: false,
        stderr: stderr.to_vec(),
        stderr_truncated: false,
    }
}

/// An [`EventPublisher`] that fails its first `fail_count` calls, then
/// succeeds every call after — drives the outbox publisher's "broker
/// unavailable for a while, then comes back" scenario (§8 S6) without
/// waiting out real exponential backoff for more than one or two ticks.
pub struct FlakyEventPublisher {
    fail_count: u32,
    attempts: AtomicU32,
}

impl FlakyEventPublisher {
    pub fn new(fail_count: u32) -> Self {
        Self { fail_count, attempts: AtomicU32::new(0) }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for FlakyEventPublisher {
    async fn publish_event(&self, _event: &OutboxEvent) -> Result<(), QueueError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_count {
            Err(QueueError::Publish(format!("broker unreachable (attempt {attempt})")))
        } else {
            Ok(())
        }
    }
}
