//! The per-submission pipeline (§4.2 steps 1-5): claim, fetch, compile,
//! run tests, finalize. One call to [`SubmissionWorker::process`] drives
//! exactly one submission end-to-end, on the calling worker's own sandbox
//! slot, the way a single consumer goroutine in the corpus drives one job
//! through claim → execute → ack without handing it off mid-flight.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use judge_audit::truncate_utf8 as truncate;
use judge_blobstore::BlobFetcher;
use judge_db::ClaimOutcome;
use judge_execution::gateway::{DispatchGateway, PoolVerdict};
use judge_execution::sandbox::{Sandbox, Stdin};
use judge_execution::slot_registry::SlotId;
use judge_execution::state_machine::{SubmissionEvent, SubmissionState, SubmissionStateMachine};
use judge_execution::types::Limits;
use judge_execution::verdict::classify;
use judge_profiles::{render_template, ProfileRegistry};
use judge_risk::ContentServiceClient;
use judge_schemas::{
    event_type, ExecutionPhase, NewExecutionLog, NewOutboxEvent, NewTestResult, Submission,
    SubmissionAggregates, TestVerdict, Verdict,
};

/// Wraps a gateway acquire failure so [`crate::pool`] can tell "the sandbox
/// pool refused us" apart from any other transient error via
/// `anyhow::Error::downcast_ref`, without the state machine or the DB layer
/// needing to know about sandbox acquisition at all.
#[derive(Debug)]
pub struct SandboxUnavailable(pub judge_execution::gateway::DispatchError);

impl std::fmt::Display for SandboxUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sandbox unavailable: {}", self.0)
    }
}

impl std::error::Error for SandboxUnavailable {}

const COMPILE_WALL_MS: i64 = 10_000;
const COMPILE_MEMORY_KB: i64 = 256 * 1024;
const COMPILE_STDERR_CAP: usize = 64 * 1024;
const MAX_CODE_BYTES: u64 = judge_risk::DEFAULT_MAX_CODE_BYTES;

/// What happened to a dispatch message after one pass through the pipeline
/// (§4.2 "if already terminal, ack and drop"). Every variant maps to
/// exactly one of ack/requeue at the call site in [`crate::pool`].
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Reached a terminal verdict (possibly already reached by a prior
    /// delivery) — ack.
    Terminal(Verdict),
    /// Another worker holds this submission — ack and drop; it is not ours
    /// to retry.
    OwnedByAnother,
    /// A transient failure (DB, blob store, content service) occurred
    /// before a terminal verdict could be recorded — caller should requeue.
    Transient(anyhow::Error),
}

/// Bundles every dependency one worker needs to drive submissions through
/// their sandbox slot. Generic over the sandbox backend so the same pipeline
/// runs against `judge-sandbox-fake` in tests and `judge-sandbox-isolate` in
/// production.
pub struct SubmissionWorker<'a, S: Sandbox> {
    pub worker_name: String,
    pub slot: SlotId,
    pub pool: PgPool,
    pub gateway: &'a DispatchGateway<S>,
    pub blobs: &'a dyn BlobFetcher,
    pub content: &'a dyn ContentServiceClient,
    pub registry: &'a ProfileRegistry,
}

impl<'a, S: Sandbox> SubmissionWorker<'a, S> {
    /// Drive one submission through claim/fetch/compile/run-tests/finalize
    /// (§4.2). `verdict` is the current pool-gate state (§4.1 policy): a
    /// disarmed pool refuses every `acquire`/`run` the gateway is asked for,
    /// which this function surfaces as a transient failure so the caller
    /// requeues rather than loses the submission.
    pub async fn process(&self, submission_id: i64, verdict: PoolVerdict) -> WorkerOutcome {
        match judge_db::claim_submission(&self.pool, submission_id, &self.worker_name).await {
            Ok(ClaimOutcome::AlreadyTerminal) => {
                return match judge_db::fetch_submission(&self.pool, submission_id).await {
                    Ok(sub) => WorkerOutcome::Terminal(sub.verdict),
                    Err(e) => WorkerOutcome::Transient(e),
                };
            }
            Ok(ClaimOutcome::OwnedByAnother) => return WorkerOutcome::OwnedByAnother,
            Ok(ClaimOutcome::Claimed) => {}
            Err(e) => return WorkerOutcome::Transient(e),
        }

        let mut machine = SubmissionStateMachine::resume_judging(submission_id);

        match self.drive_claimed(submission_id, &mut machine, verdict).await {
            Ok(v) => WorkerOutcome::Terminal(v),
            Err(e) => WorkerOutcome::Transient(e),
        }
    }

    async fn drive_claimed(
        &self,
        submission_id: i64,
        machine: &mut SubmissionStateMachine,
        verdict: PoolVerdict,
    ) -> anyhow::Result<Verdict> {
        let submission = judge_db::fetch_submission(&self.pool, submission_id).await?;

        let profile = match self.registry.lookup(&submission.language) {
            Ok(p) => p.clone(),
            Err(_) => {
                return self
                    .finalize_internal_error(submission_id, machine, "unknown language profile")
                    .await
            }
        };

        let fetch_result = self.fetch(&submission).await;
        let (code, metadata) = match fetch_result {
            Ok(pair) => pair,
            Err(e) => {
                machine
                    .apply(&SubmissionEvent::FetchFailed, Some(&format!("fetch-{submission_id}")))
                    .ok();
                return self
                    .finalize_internal_error(submission_id, machine, &e.to_string())
                    .await;
            }
        };

        if let Err(e) = judge_risk::validate_submission(
            self.registry,
            &submission.language,
            code.len() as u64,
            MAX_CODE_BYTES,
            &metadata,
        ) {
            return self.finalize_internal_error(submission_id, machine, &e.to_string()).await;
        }

        let sandbox_box = self
            .gateway
            .acquire(self.slot.as_i32(), verdict)
            .map_err(|e| anyhow::Error::new(SandboxUnavailable(e)))?;

        self.gateway
            .stage_file(&sandbox_box, &profile.source_filename, &code)
            .map_err(|e| anyhow::anyhow!("stage source failed: {e}"))?;

        let compile_outcome = self.compile(submission_id, &sandbox_box, &profile, verdict).await;

        let outcome = match compile_outcome {
            Err(e) => {
                self.gateway.release(sandbox_box).ok();
                return self.finalize_internal_error(submission_id, machine, &e.to_string()).await;
            }
            Ok(CompileOutcome::Failed(stderr)) => {
                machine
                    .apply(&SubmissionEvent::CompileFailed, Some(&format!("compile-{submission_id}")))
                    .ok();
                self.gateway.release(sandbox_box).ok();
                self.finalize(
                    submission_id,
                    SubmissionAggregates {
                        verdict: Verdict::CompileError,
                        tests_passed: 0,
                        tests_total: 0,
                        worst_wall_ms: 0,
                        worst_memory_kb: 0,
                        score: SubmissionAggregates::score_for(Verdict::CompileError, 0, 0),
                        compiler_output: Some(truncate(&stderr, COMPILE_STDERR_CAP)),
                    },
                )
                .await
            }
            Ok(CompileOutcome::Skipped | CompileOutcome::Ok) => {
                let result = self
                    .run_tests(submission_id, &sandbox_box, &profile, &metadata, verdict)
                    .await;
                self.gateway.release(sandbox_box).ok();

                match result {
                    Ok(run) => {
                        if run.submission_verdict == Verdict::Accepted {
                            machine
                                .apply(&SubmissionEvent::AllTestsPassed, Some(&format!("final-{submission_id}")))
                                .ok();
                        } else {
                            machine
                                .apply(
                                    &SubmissionEvent::TestOutcome(
                                        run.first_failure.expect("non-accepted verdict without a failing test"),
                                    ),
                                    Some(&format!("final-{submission_id}")),
                                )
                                .ok();
                        }

                        if let Err(e) = judge_db::write_test_results(&self.pool, submission_id, &run.results).await
                        {
                            return Err(e);
                        }

                        self.finalize(
                            submission_id,
                            SubmissionAggregates {
                                verdict: run.submission_verdict,
                                tests_passed: run.tests_passed,
                                tests_total: run.tests_total,
                                worst_wall_ms: run.worst_wall_ms,
                                worst_memory_kb: run.worst_memory_kb,
                                score: SubmissionAggregates::score_for(
                                    run.submission_verdict,
                                    run.tests_passed,
                                    run.tests_total,
                                ),
                                compiler_output: None,
                            },
                        )
                        .await
                    }
                    Err(e) => self.finalize_internal_error(submission_id, machine, &e.to_string()).await,
                }
            }
        };

        outcome
    }

    async fn fetch(&self, submission: &Submission) -> anyhow::Result<(Vec<u8>, judge_schemas::ProblemMetadata)> {
        let code = self
            .blobs
            .get(&submission.code_blob_ref)
            .await
            .map_err(|e| anyhow::anyhow!("blob fetch failed: {e}"))?;
        let metadata = self.content.fetch_problem_metadata(submission.problem_id).await?;
        Ok((code.to_vec(), metadata))
    }

    async fn compile(
        &self,
        submission_id: i64,
        sandbox_box: &S::Box,
        profile: &judge_schemas::LanguageProfile,
        verdict: PoolVerdict,
    ) -> anyhow::Result<CompileOutcome> {
        if profile.compile_template.is_empty() {
            return Ok(CompileOutcome::Skipped);
        }

        let argv = render_template(&profile.compile_template, &profile.source_filename, profile.binary_filename.as_deref());
        let limits = Limits::wall_only(COMPILE_WALL_MS, COMPILE_MEMORY_KB);

        let report = self
            .gateway
            .run(sandbox_box, &argv, limits, Stdin::None, COMPILE_STDERR_CAP, COMPILE_STDERR_CAP, verdict)
            .map_err(|e| anyhow::anyhow!("compile run failed: {e}"))?;

        judge_db::insert_execution_log(
            &self.pool,
            submission_id,
            &NewExecutionLog {
                phase: ExecutionPhase::Compile,
                ordinal: None,
                exit_kind: report.exit_kind.to_string(),
                exit_code: report.exit_code,
                signal: report.signal,
                wall_ms: report.wall_ms,
                cpu_ms: report.cpu_ms,
                memory_kb: report.peak_memory_kb,
                stdout_truncated: report.stdout_truncated,
                stderr_truncated: report.stderr_truncated,
            },
        )
        .await
        .ok();

        if matches!(report.exit_code, Some(0)) {
            Ok(CompileOutcome::Ok)
        } else {
            Ok(CompileOutcome::Failed(String::from_utf8_lossy(&report.stderr).into_owned()))
        }
    }

    async fn run_tests(
        &self,
        submission_id: i64,
        sandbox_box: &S::Box,
        profile: &judge_schemas::LanguageProfile,
        metadata: &judge_schemas::ProblemMetadata,
        verdict: PoolVerdict,
    ) -> anyhow::Result<TestRun> {
        let mut ordered = metadata.test_cases.clone();
        ordered.sort_by_key(|t| t.ordinal);

        let mut results = Vec::with_capacity(ordered.len());
        let mut tests_passed = 0;
        let mut worst_wall_ms = 0;
        let mut worst_memory_kb = 0;
        let mut first_failure = None;
        let mut submission_verdict = Verdict::Accepted;

        let argv = render_template(&profile.run_template, &profile.source_filename, profile.binary_filename.as_deref());

        for test in &ordered {
            let input = self
                .blobs
                .get(&test.input_blob_ref)
                .await
                .map_err(|e| anyhow::anyhow!("test input fetch failed: {e}"))?;
            let expected = self
                .blobs
                .get(&test.output_blob_ref)
                .await
                .map_err(|e| anyhow::anyhow!("test output fetch failed: {e}"))?;

            let wall_ms = test.time_ms_override.unwrap_or(metadata.time_ms) + profile.overhead_wall_ms;
            let memory_kb = test.memory_kb_override.unwrap_or(metadata.memory_kb) + profile.overhead_memory_kb;
            let limits = Limits::wall_only(wall_ms, memory_kb);

            let report = self
                .gateway
                .run(sandbox_box, &argv, limits, Stdin::Bytes(input.to_vec()), 64 * 1024, 64 * 1024, verdict)
                .map_err(|e| anyhow::anyhow!("test run failed: {e}"))?;

            judge_db::insert_execution_log(
                &self.pool,
                submission_id,
                &NewExecutionLog {
                    phase: ExecutionPhase::Test,
                    ordinal: Some(test.ordinal),
                    exit_kind: report.exit_kind.to_string(),
                    exit_code: report.exit_code,
                    signal: report.signal,
                    wall_ms: report.wall_ms,
                    cpu_ms: report.cpu_ms,
                    memory_kb: report.peak_memory_kb,
                    stdout_truncated: report.stdout_truncated,
                    stderr_truncated: report.stderr_truncated,
                },
            )
            .await
            .ok();

            let test_verdict = classify(&report, memory_kb, &expected);

            worst_wall_ms = worst_wall_ms.max(report.wall_ms);
            worst_memory_kb = worst_memory_kb.max(report.peak_memory_kb);

            results.push(NewTestResult {
                test_case_id: test.id,
                ordinal: test.ordinal,
                verdict: test_verdict,
                wall_ms: report.wall_ms,
                memory_kb: report.peak_memory_kb,
                checker_message: None,
            });

            if test_verdict == TestVerdict::Accepted {
                tests_passed += 1;
            } else if first_failure.is_none() {
                first_failure = Some(test_verdict);
                submission_verdict = test_verdict.as_submission_verdict();
                if metadata.short_circuit {
                    break;
                }
            }
        }

        Ok(TestRun {
            results,
            tests_passed,
            tests_total: ordered.len() as i32,
            worst_wall_ms,
            worst_memory_kb,
            first_failure,
            submission_verdict,
        })
    }

    async fn finalize(&self, submission_id: i64, aggregates: SubmissionAggregates) -> anyhow::Result<Verdict> {
        let verdict = aggregates.verdict;
        let event = judged_event(submission_id, &aggregates);
        judge_db::finalize_with_outbox(&self.pool, submission_id, &aggregates, &event).await?;
        Ok(verdict)
    }

    async fn finalize_internal_error(
        &self,
        submission_id: i64,
        _machine: &SubmissionStateMachine,
        reason: &str,
    ) -> anyhow::Result<Verdict> {
        let aggregates = SubmissionAggregates {
            verdict: Verdict::InternalError,
            tests_passed: 0,
            tests_total: 0,
            worst_wall_ms: 0,
            worst_memory_kb: 0,
            score: 0,
            compiler_output: Some(truncate(reason, COMPILE_STDERR_CAP)),
        };
        let event = failed_event(submission_id, reason);
        judge_db::finalize_with_outbox(&self.pool, submission_id, &aggregates, &event).await?;
        Ok(Verdict::InternalError)
    }
}

enum CompileOutcome {
    Skipped,
    Ok,
    Failed(String),
}

struct TestRun {
    results: Vec<NewTestResult>,
    tests_passed: i32,
    tests_total: i32,
    worst_wall_ms: i64,
    worst_memory_kb: i64,
    first_failure: Option<TestVerdict>,
    submission_verdict: Verdict,
}

fn judged_event(submission_id: i64, aggregates: &SubmissionAggregates) -> NewOutboxEvent {
    NewOutboxEvent {
        event_id: Uuid::new_v4(),
        event_type: event_type::SUBMISSION_JUDGED.to_string(),
        aggregate_type: "submission".to_string(),
        aggregate_id: submission_id,
        payload: json!({
            "submission_id": submission_id,
            "verdict": aggregates.verdict.as_str(),
            "tests_passed": aggregates.tests_passed,
            "tests_total": aggregates.tests_total,
            "score": aggregates.score,
            "judged_at": Utc::now().to_rfc3339(),
        }),
    }
}

fn failed_event(submission_id: i64, reason: &str) -> NewOutboxEvent {
    NewOutboxEvent {
        event_id: Uuid::new_v4(),
        event_type: event_type::SUBMISSION_FAILED.to_string(),
        aggregate_type: "submission".to_string(),
        aggregate_id: submission_id,
        payload: json!({
            "submission_id": submission_id,
            "reason": reason,
        }),
    }
}
