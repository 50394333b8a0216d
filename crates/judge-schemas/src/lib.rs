//! Shared wire and persistence types for the judge core.
//!
//! Every type here is `Serialize + Deserialize` so it round-trips through
//! Postgres (via `judge-db`), the dispatch queue, and the outbox envelope
//! without a separate DTO layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The transactional-outbox wire envelope published to the topic exchange.
///
/// Snake-case on the wire by construction (`#[serde(rename_all)]` is not
/// needed: every field is already snake_case).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_type: String,
    pub event_id: Uuid,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

/// Dotted event-type names emitted by the judge core (§6).
pub mod event_type {
    pub const SUBMISSION_RECEIVED: &str = "submission.received";
    pub const SUBMISSION_JUDGED: &str = "submission.judged";
    pub const SUBMISSION_FAILED: &str = "submission.failed";
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The final judgement tag of a submission. Serializes to the closed set of
/// snake_case tokens used on the wire and in Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pending,
    Judging,
    Accepted,
    WrongAnswer,
    Tle,
    Mle,
    RuntimeError,
    CompileError,
    InternalError,
}

impl Verdict {
    /// `judged_at` must be set iff the verdict is terminal (§3 invariant).
    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Pending | Verdict::Judging)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Judging => "judging",
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong-answer",
            Verdict::Tle => "tle",
            Verdict::Mle => "mle",
            Verdict::RuntimeError => "runtime-error",
            Verdict::CompileError => "compile-error",
            Verdict::InternalError => "internal-error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Verdict::Pending,
            "judging" => Verdict::Judging,
            "accepted" => Verdict::Accepted,
            "wrong-answer" => Verdict::WrongAnswer,
            "tle" => Verdict::Tle,
            "mle" => Verdict::Mle,
            "runtime-error" => Verdict::RuntimeError,
            "compile-error" => Verdict::CompileError,
            "internal-error" => Verdict::InternalError,
            _ => return None,
        })
    }
}

/// Per-test verdict (§4.2 classification rule). A strict subset of
/// [`Verdict`] — compile-error and internal-error never apply to a single
/// test row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestVerdict {
    Accepted,
    WrongAnswer,
    Tle,
    Mle,
    RuntimeError,
}

impl TestVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            TestVerdict::Accepted => "accepted",
            TestVerdict::WrongAnswer => "wrong-answer",
            TestVerdict::Tle => "tle",
            TestVerdict::Mle => "mle",
            TestVerdict::RuntimeError => "runtime-error",
        }
    }

    /// The matching terminal submission verdict if this test is the first
    /// non-accepted result (§4.2 step 4).
    pub fn as_submission_verdict(self) -> Verdict {
        match self {
            TestVerdict::Accepted => Verdict::Accepted,
            TestVerdict::WrongAnswer => Verdict::WrongAnswer,
            TestVerdict::Tle => Verdict::Tle,
            TestVerdict::Mle => Verdict::Mle,
            TestVerdict::RuntimeError => Verdict::RuntimeError,
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub owner_id: i64,
    pub problem_id: i64,
    pub contest_id: Option<i64>,
    pub language: String,
    pub code_blob_ref: String,
    pub verdict: Verdict,
    pub score: i32,
    pub wall_ms: i64,
    pub memory_kb: i64,
    pub tests_passed: i32,
    pub tests_total: i32,
    pub compiler_output: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub judged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub owner_id: i64,
    pub problem_id: i64,
    pub contest_id: Option<i64>,
    pub language: String,
    pub code_blob_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionTestResult {
    pub id: i64,
    pub submission_id: i64,
    pub test_case_id: i64,
    pub ordinal: i32,
    pub verdict: TestVerdict,
    pub wall_ms: i64,
    pub memory_kb: i64,
    pub checker_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTestResult {
    pub test_case_id: i64,
    pub ordinal: i32,
    pub verdict: TestVerdict,
    pub wall_ms: i64,
    pub memory_kb: i64,
    pub checker_message: Option<String>,
}

/// Which phase of a submission's judgement a sandbox `run` belongs to
/// (§6 persisted state, `execution_logs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Compile,
    Test,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Compile => "compile",
            ExecutionPhase::Test => "test",
        }
    }
}

/// One row of the raw per-invocation resource trace: every sandbox `run`
/// a worker performs against a submission, compile step included, whether
/// or not it produced a `SubmissionTestResult`.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub phase: ExecutionPhase,
    /// Test ordinal when `phase = Test`; `None` for the compile step.
    pub ordinal: Option<i32>,
    pub exit_kind: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_ms: i64,
    pub cpu_ms: i64,
    pub memory_kb: i64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Aggregated fields written by `finalize` (§4.6).
#[derive(Debug, Clone)]
pub struct SubmissionAggregates {
    pub verdict: Verdict,
    pub tests_passed: i32,
    pub tests_total: i32,
    pub worst_wall_ms: i64,
    pub worst_memory_kb: i64,
    pub score: i32,
    pub compiler_output: Option<String>,
}

impl SubmissionAggregates {
    /// score = 100 * passed / total, except compile-error/internal-error => 0.
    pub fn score_for(verdict: Verdict, tests_passed: i32, tests_total: i32) -> i32 {
        if matches!(verdict, Verdict::CompileError | Verdict::InternalError) || tests_total == 0 {
            return 0;
        }
        ((tests_passed as i64 * 100) / tests_total as i64) as i32
    }
}

// ---------------------------------------------------------------------------
// LanguageProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub code: String,
    pub display_name: String,
    pub version: String,
    /// Empty => interpreted, no compile step.
    pub compile_template: Vec<String>,
    pub run_template: Vec<String>,
    pub source_filename: String,
    pub binary_filename: Option<String>,
    pub overhead_wall_ms: i64,
    pub overhead_memory_kb: i64,
}

// ---------------------------------------------------------------------------
// JudgeWorker (observability only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeWorker {
    pub name: String,
    pub status: WorkerStatus,
    pub current_submission_id: Option<i64>,
    pub sandbox_id: i32,
    pub last_heartbeat: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// OutboxEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub payload: serde_json::Value,
}

/// `retry_count` must never exceed this (§3, §8 invariant 2).
pub const OUTBOX_RETRY_CAP: i32 = 10;

// ---------------------------------------------------------------------------
// TestCase (external, owned by the content service)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub ordinal: i32,
    pub input_blob_ref: String,
    pub output_blob_ref: String,
    pub time_ms_override: Option<i64>,
    pub memory_kb_override: Option<i64>,
    pub is_sample: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemMetadata {
    pub problem_id: i64,
    pub time_ms: i64,
    pub memory_kb: i64,
    pub short_circuit: bool,
    pub test_cases: Vec<TestCase>,
}

// ---------------------------------------------------------------------------
// Dispatch message (§6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub submission_id: i64,
    pub problem_id: i64,
    pub language: String,
}

pub const DISPATCH_ROUTING_KEY: &str = "judge-submission";
