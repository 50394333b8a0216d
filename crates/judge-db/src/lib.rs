//! The Submission Store (§4.6): Postgres persistence for submissions, their
//! per-test results, the transactional outbox (§4.4), and the judge worker
//! registry (§3 JudgeWorker).

use anyhow::{anyhow, Context, Result};
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use judge_schemas::{
    JudgeWorker, NewExecutionLog, NewOutboxEvent, NewSubmission, NewTestResult, OutboxEvent,
    OutboxStatus, Submission, SubmissionAggregates, SubmissionTestResult, TestVerdict, Verdict,
    WorkerStatus,
};

pub const ENV_DATABASE_URL: &str = "JUDGE_DATABASE_URL";

/// Connect to Postgres using `JUDGE_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DATABASE_URL)
        .with_context(|| format!("missing env var {ENV_DATABASE_URL}"))?;

    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")
}

/// Test helper: connect using `JUDGE_DATABASE_URL` and ensure migrations are applied.
#[cfg(feature = "testkit")]
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Test-only escape hatch: force an outbox row's `retry_count`, so a test can
/// exercise the retry-cap escalation path without waiting out real backoff
/// delays. MUST NOT be reachable outside `testkit`.
#[cfg(feature = "testkit")]
pub async fn testkit_set_outbox_retry_count(
    pool: &PgPool,
    event_id: Uuid,
    retry_count: i32,
) -> Result<()> {
    sqlx::query("update outbox_events set retry_count = $2 where event_id = $1")
        .bind(event_id)
        .bind(retry_count)
        .execute(pool)
        .await
        .context("testkit_set_outbox_retry_count failed")?;
    Ok(())
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_submissions_table: bool,
}

/// Connectivity + schema-presence check, used by the daemon health endpoint.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'submissions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_submissions_table: exists,
    })
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

fn verdict_row(row: &sqlx::postgres::PgRow, col: &str) -> Result<Verdict> {
    let s: String = row.try_get(col)?;
    Verdict::parse(&s).ok_or_else(|| anyhow!("invalid verdict in row: {s}"))
}

fn submission_from_row(row: sqlx::postgres::PgRow) -> Result<Submission> {
    Ok(Submission {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        problem_id: row.try_get("problem_id")?,
        contest_id: row.try_get("contest_id")?,
        language: row.try_get("language")?,
        code_blob_ref: row.try_get("code_blob_ref")?,
        verdict: verdict_row(&row, "verdict")?,
        score: row.try_get("score")?,
        wall_ms: row.try_get("wall_ms")?,
        memory_kb: row.try_get("memory_kb")?,
        tests_passed: row.try_get("tests_passed")?,
        tests_total: row.try_get("tests_total")?,
        compiler_output: row.try_get("compiler_output")?,
        submitted_at: row.try_get("submitted_at")?,
        judged_at: row.try_get("judged_at")?,
    })
}

const SUBMISSION_COLUMNS: &str = r#"
    id, owner_id, problem_id, contest_id, language, code_blob_ref, verdict,
    score, wall_ms, memory_kb, tests_passed, tests_total, compiler_output,
    submitted_at, judged_at
"#;

/// Insert a new submission row. Starts `pending`, `tests_total = 0`.
pub async fn create_submission(pool: &PgPool, new: &NewSubmission) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into submissions (owner_id, problem_id, contest_id, language, code_blob_ref)
        values ($1, $2, $3, $4, $5)
        returning id
        "#,
    )
    .bind(new.owner_id)
    .bind(new.problem_id)
    .bind(new.contest_id)
    .bind(&new.language)
    .bind(&new.code_blob_ref)
    .fetch_one(pool)
    .await
    .context("create_submission failed")?;

    Ok(id)
}

/// Insert a submission and its `submission.received` outbox row in one
/// transaction (§4.4 "never send a queue message outside the outbox"):
/// `build_event` is handed the new submission id so it can shape the event
/// payload, and both writes commit or roll back together.
pub async fn create_submission_with_outbox(
    pool: &PgPool,
    new: &NewSubmission,
    build_event: impl FnOnce(i64) -> NewOutboxEvent,
) -> Result<(i64, Uuid)> {
    let mut tx = pool.begin().await.context("create_submission_with_outbox: begin failed")?;

    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into submissions (owner_id, problem_id, contest_id, language, code_blob_ref)
        values ($1, $2, $3, $4, $5)
        returning id
        "#,
    )
    .bind(new.owner_id)
    .bind(new.problem_id)
    .bind(new.contest_id)
    .bind(&new.language)
    .bind(&new.code_blob_ref)
    .fetch_one(&mut *tx)
    .await
    .context("create_submission_with_outbox: submission insert failed")?;

    let event = build_event(id);
    let event_id = event.event_id;

    sqlx::query(
        r#"
        insert into outbox_events (event_id, event_type, aggregate_type, aggregate_id, payload)
        values ($1, $2, $3, $4, $5)
        on conflict (event_id) do nothing
        "#,
    )
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(&event.aggregate_type)
    .bind(event.aggregate_id)
    .bind(&event.payload)
    .execute(&mut *tx)
    .await
    .context("create_submission_with_outbox: outbox insert failed")?;

    tx.commit().await.context("create_submission_with_outbox: commit failed")?;
    Ok((id, event_id))
}

pub async fn fetch_submission(pool: &PgPool, id: i64) -> Result<Submission> {
    let row = sqlx::query(&format!(
        "select {SUBMISSION_COLUMNS} from submissions where id = $1"
    ))
    .bind(id)
    .fetch_one(pool)
    .await
    .context("fetch_submission failed")?;

    submission_from_row(row)
}

/// Atomically claim the oldest `pending` submission for judging (§4.2 step 1,
/// §5 concurrency model). Uses `FOR UPDATE SKIP LOCKED` so concurrent workers
/// never claim the same row. Returns `None` if no submission is pending.
///
/// Gated behind `runtime-claim`: only the Judge Worker Pool (`judge-runtime`)
/// may claim submissions, enforcing the single-claimant-per-row invariant at
/// compile time.
#[cfg(feature = "runtime-claim")]
pub async fn claim_next_submission(pool: &PgPool, worker_name: &str) -> Result<Option<Submission>> {
    let row = sqlx::query(&format!(
        r#"
        with to_claim as (
            select id
            from submissions
            where verdict = 'pending'
            order by id asc
            limit 1
            for update skip locked
        )
        update submissions
           set verdict = 'judging',
               claimed_by = $1,
               last_heartbeat = now()
         where id in (select id from to_claim)
        returning {SUBMISSION_COLUMNS}
        "#
    ))
    .bind(worker_name)
    .fetch_optional(pool)
    .await
    .context("claim_next_submission failed")?;

    row.map(submission_from_row).transpose()
}

/// The result of attempting to claim a specific submission by id (§4.2
/// step 1 as driven by a dispatch message naming that id, rather than
/// [`claim_next_submission`]'s blind oldest-pending pull).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This call claimed the row; it is now `judging`, owned by `worker_name`.
    Claimed,
    /// The row is already in a terminal verdict — a redelivered dispatch
    /// message for an already-judged submission. Not an error.
    AlreadyTerminal,
    /// The row is `judging` but owned by a different worker (a racing
    /// redelivery that lost, or a dispatch message for a submission another
    /// worker is already holding).
    OwnedByAnother,
}

/// Atomically claim a specific submission by id (§4.2 step 1, driven by the
/// `submission_id` named in a dispatch message). Uses `FOR UPDATE SKIP
/// LOCKED` so a concurrent claim attempt for the same id never succeeds
/// twice.
///
/// Gated behind `runtime-claim` for the same reason as
/// [`claim_next_submission`].
#[cfg(feature = "runtime-claim")]
pub async fn claim_submission(
    pool: &PgPool,
    submission_id: i64,
    worker_name: &str,
) -> Result<ClaimOutcome> {
    let mut tx = pool.begin().await.context("claim_submission: begin failed")?;

    let locked = sqlx::query(
        "select verdict, claimed_by from submissions where id = $1 for update skip locked",
    )
    .bind(submission_id)
    .fetch_optional(&mut *tx)
    .await
    .context("claim_submission: lock failed")?;

    let Some(row) = locked else {
        // Row is locked by a concurrent claimant; treat as lost the race.
        return Ok(ClaimOutcome::OwnedByAnother);
    };

    let verdict_str: String = row.try_get("verdict")?;
    let verdict = Verdict::parse(&verdict_str).ok_or_else(|| anyhow!("invalid verdict in row: {verdict_str}"))?;

    if verdict.is_terminal() {
        return Ok(ClaimOutcome::AlreadyTerminal);
    }

    if verdict == Verdict::Judging {
        let claimed_by: Option<String> = row.try_get("claimed_by")?;
        if claimed_by.as_deref() != Some(worker_name) {
            return Ok(ClaimOutcome::OwnedByAnother);
        }
    }

    sqlx::query(
        r#"
        update submissions
           set verdict = 'judging',
               claimed_by = $2,
               last_heartbeat = now()
         where id = $1
        "#,
    )
    .bind(submission_id)
    .bind(worker_name)
    .execute(&mut *tx)
    .await
    .context("claim_submission: update failed")?;

    tx.commit().await.context("claim_submission: commit failed")?;
    Ok(ClaimOutcome::Claimed)
}

/// Refresh the heartbeat on a `judging` submission this worker still owns.
/// Returns `false` if the submission is no longer claimed by `worker_name`
/// (e.g. it was reclaimed for staleness).
pub async fn heartbeat_claim(pool: &PgPool, submission_id: i64, worker_name: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update submissions
           set last_heartbeat = now()
         where id = $1
           and claimed_by = $2
           and verdict = 'judging'
        returning id
        "#,
    )
    .bind(submission_id)
    .bind(worker_name)
    .fetch_optional(pool)
    .await
    .context("heartbeat_claim failed")?;

    Ok(row.is_some())
}

/// Reclaim submissions stuck `judging` with a heartbeat older than
/// `staleness_secs` (§8 invariant 4). Reverts them to `pending` so another
/// worker can claim them. Returns the reclaimed submission ids.
#[cfg(feature = "runtime-claim")]
pub async fn reclaim_stale_submissions(pool: &PgPool, staleness_secs: i64) -> Result<Vec<i64>> {
    if staleness_secs <= 0 {
        return Err(anyhow!("staleness_secs must be > 0"));
    }

    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        update submissions
           set verdict = 'pending',
               claimed_by = null,
               last_heartbeat = null
         where verdict = 'judging'
           and last_heartbeat < now() - ($1 || ' seconds')::interval
        returning id
        "#,
    )
    .bind(staleness_secs)
    .fetch_all(pool)
    .await
    .context("reclaim_stale_submissions failed")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Bulk-insert per-test results (§4.2 step 3). Idempotent on
/// `(submission_id, ordinal)` so a redelivered test batch is a no-op.
pub async fn write_test_results(
    pool: &PgPool,
    submission_id: i64,
    results: &[NewTestResult],
) -> Result<()> {
    for r in results {
        sqlx::query(
            r#"
            insert into submission_test_results
                (submission_id, test_case_id, ordinal, verdict, wall_ms, memory_kb, checker_message)
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (submission_id, ordinal) do nothing
            "#,
        )
        .bind(submission_id)
        .bind(r.test_case_id)
        .bind(r.ordinal)
        .bind(r.verdict.as_str())
        .bind(r.wall_ms)
        .bind(r.memory_kb)
        .bind(&r.checker_message)
        .execute(pool)
        .await
        .context("write_test_results failed")?;
    }
    Ok(())
}

pub async fn list_test_results(
    pool: &PgPool,
    submission_id: i64,
) -> Result<Vec<SubmissionTestResult>> {
    let rows = sqlx::query(
        r#"
        select id, submission_id, test_case_id, ordinal, verdict, wall_ms, memory_kb, checker_message
        from submission_test_results
        where submission_id = $1
        order by ordinal asc
        "#,
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await
    .context("list_test_results failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let verdict_str: String = row.try_get("verdict")?;
        let verdict = match verdict_str.as_str() {
            "accepted" => TestVerdict::Accepted,
            "wrong-answer" => TestVerdict::WrongAnswer,
            "tle" => TestVerdict::Tle,
            "mle" => TestVerdict::Mle,
            "runtime-error" => TestVerdict::RuntimeError,
            other => return Err(anyhow!("invalid test verdict in row: {other}")),
        };
        out.push(SubmissionTestResult {
            id: row.try_get("id")?,
            submission_id: row.try_get("submission_id")?,
            test_case_id: row.try_get("test_case_id")?,
            ordinal: row.try_get("ordinal")?,
            verdict,
            wall_ms: row.try_get("wall_ms")?,
            memory_kb: row.try_get("memory_kb")?,
            checker_message: row.try_get("checker_message")?,
        });
    }
    Ok(out)
}

/// Record one raw sandbox invocation (§6 persisted state, `execution_logs`).
/// Independent of `submission_test_results`: called for the compile step too,
/// and for tests skipped by short-circuit that never get a result row.
pub async fn insert_execution_log(
    pool: &PgPool,
    submission_id: i64,
    log: &NewExecutionLog,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into execution_logs
            (submission_id, phase, ordinal, exit_kind, exit_code, signal,
             wall_ms, cpu_ms, memory_kb, stdout_truncated, stderr_truncated)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(submission_id)
    .bind(log.phase.as_str())
    .bind(log.ordinal)
    .bind(&log.exit_kind)
    .bind(log.exit_code)
    .bind(log.signal)
    .bind(log.wall_ms)
    .bind(log.cpu_ms)
    .bind(log.memory_kb)
    .bind(log.stdout_truncated)
    .bind(log.stderr_truncated)
    .execute(pool)
    .await
    .context("insert_execution_log failed")?;
    Ok(())
}

/// Write the terminal aggregates for a submission (§4.2 step 4, §4.6).
/// Only a `judging` submission can be finalized; returns `false` if the
/// submission was not in that state (e.g. already finalized by a racing
/// redelivery — finalize is therefore safe to call twice).
pub async fn finalize(
    pool: &PgPool,
    submission_id: i64,
    aggregates: &SubmissionAggregates,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update submissions
           set verdict = $2,
               score = $3,
               tests_passed = $4,
               tests_total = $5,
               wall_ms = $6,
               memory_kb = $7,
               compiler_output = $8,
               judged_at = now()
         where id = $1
           and verdict = 'judging'
        returning id
        "#,
    )
    .bind(submission_id)
    .bind(aggregates.verdict.as_str())
    .bind(aggregates.score)
    .bind(aggregates.tests_passed)
    .bind(aggregates.tests_total)
    .bind(aggregates.worst_wall_ms)
    .bind(aggregates.worst_memory_kb)
    .bind(&aggregates.compiler_output)
    .fetch_optional(pool)
    .await
    .context("finalize failed")?;

    Ok(row.is_some())
}

/// [`finalize`] plus its `submission.judged`/`submission.failed` outbox row,
/// in one transaction (§4.4 "never send a queue message outside the
/// outbox"). Returns `false` (and does not enqueue the event) under the same
/// condition `finalize` would: the submission was not `judging`.
pub async fn finalize_with_outbox(
    pool: &PgPool,
    submission_id: i64,
    aggregates: &SubmissionAggregates,
    outbox_event: &NewOutboxEvent,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("finalize_with_outbox: begin failed")?;

    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update submissions
           set verdict = $2,
               score = $3,
               tests_passed = $4,
               tests_total = $5,
               wall_ms = $6,
               memory_kb = $7,
               compiler_output = $8,
               judged_at = now()
         where id = $1
           and verdict = 'judging'
        returning id
        "#,
    )
    .bind(submission_id)
    .bind(aggregates.verdict.as_str())
    .bind(aggregates.score)
    .bind(aggregates.tests_passed)
    .bind(aggregates.tests_total)
    .bind(aggregates.worst_wall_ms)
    .bind(aggregates.worst_memory_kb)
    .bind(&aggregates.compiler_output)
    .fetch_optional(&mut *tx)
    .await
    .context("finalize_with_outbox: submission update failed")?;

    if row.is_none() {
        tx.rollback().await.context("finalize_with_outbox: rollback failed")?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        insert into outbox_events (event_id, event_type, aggregate_type, aggregate_id, payload)
        values ($1, $2, $3, $4, $5)
        on conflict (event_id) do nothing
        "#,
    )
    .bind(outbox_event.event_id)
    .bind(&outbox_event.event_type)
    .bind(&outbox_event.aggregate_type)
    .bind(outbox_event.aggregate_id)
    .bind(&outbox_event.payload)
    .execute(&mut *tx)
    .await
    .context("finalize_with_outbox: outbox insert failed")?;

    tx.commit().await.context("finalize_with_outbox: commit failed")?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Judge worker registry (§3 JudgeWorker)
// ---------------------------------------------------------------------------

fn worker_status_from_str(s: &str) -> Result<WorkerStatus> {
    Ok(match s {
        "idle" => WorkerStatus::Idle,
        "busy" => WorkerStatus::Busy,
        "offline" => WorkerStatus::Offline,
        other => return Err(anyhow!("invalid worker status: {other}")),
    })
}

/// Upsert a worker's heartbeat row. Called by the Judge Worker Pool on every
/// poll tick, whether idle or busy.
pub async fn upsert_worker_heartbeat(pool: &PgPool, worker: &JudgeWorker) -> Result<()> {
    sqlx::query(
        r#"
        insert into judge_workers (name, status, current_submission_id, sandbox_id, last_heartbeat)
        values ($1, $2, $3, $4, $5)
        on conflict (name) do update
            set status = excluded.status,
                current_submission_id = excluded.current_submission_id,
                sandbox_id = excluded.sandbox_id,
                last_heartbeat = excluded.last_heartbeat
        "#,
    )
    .bind(&worker.name)
    .bind(match worker.status {
        WorkerStatus::Idle => "idle",
        WorkerStatus::Busy => "busy",
        WorkerStatus::Offline => "offline",
    })
    .bind(worker.current_submission_id)
    .bind(worker.sandbox_id)
    .bind(worker.last_heartbeat)
    .execute(pool)
    .await
    .context("upsert_worker_heartbeat failed")?;
    Ok(())
}

pub async fn list_workers(pool: &PgPool) -> Result<Vec<JudgeWorker>> {
    let rows = sqlx::query(
        "select name, status, current_submission_id, sandbox_id, last_heartbeat from judge_workers order by name asc",
    )
    .fetch_all(pool)
    .await
    .context("list_workers failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let status_str: String = row.try_get("status")?;
        out.push(JudgeWorker {
            name: row.try_get("name")?,
            status: worker_status_from_str(&status_str)?,
            current_submission_id: row.try_get("current_submission_id")?,
            sandbox_id: row.try_get("sandbox_id")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
        });
    }
    Ok(out)
}

pub async fn mark_worker_offline(pool: &PgPool, name: &str) -> Result<()> {
    sqlx::query("update judge_workers set status = 'offline' where name = $1")
        .bind(name)
        .execute(pool)
        .await
        .context("mark_worker_offline failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactional outbox (§4.4)
// ---------------------------------------------------------------------------

fn outbox_status_from_str(s: &str) -> Result<OutboxStatus> {
    Ok(match s {
        "pending" => OutboxStatus::Pending,
        "processing" => OutboxStatus::Processing,
        "published" => OutboxStatus::Published,
        "failed" => OutboxStatus::Failed,
        other => return Err(anyhow!("invalid outbox status: {other}")),
    })
}

const OUTBOX_COLUMNS: &str = r#"
    id, event_id, event_type, aggregate_type, aggregate_id, payload, status,
    retry_count, next_retry_at, last_error, created_at, published_at
"#;

fn outbox_from_row(row: sqlx::postgres::PgRow) -> Result<OutboxEvent> {
    let status_str: String = row.try_get("status")?;
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        payload: row.try_get("payload")?,
        status: outbox_status_from_str(&status_str)?,
        retry_count: row.try_get("retry_count")?,
        next_retry_at: row.try_get("next_retry_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
    })
}

/// Enqueue an outbox event (§4.4 step 0, written in the same transaction as
/// the business-data write by the caller). Idempotent on `event_id`: returns
/// `false` without inserting a second row if the event was already enqueued.
pub async fn outbox_enqueue(pool: &PgPool, new: &NewOutboxEvent) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into outbox_events (event_id, event_type, aggregate_type, aggregate_id, payload)
        values ($1, $2, $3, $4, $5)
        on conflict (event_id) do nothing
        returning id
        "#,
    )
    .bind(new.event_id)
    .bind(&new.event_type)
    .bind(&new.aggregate_type)
    .bind(new.aggregate_id)
    .bind(&new.payload)
    .fetch_optional(pool)
    .await
    .context("outbox_enqueue failed")?;

    Ok(row.is_some())
}

/// Atomically claim up to `batch_size` ready rows (§4.4 step 1): `pending`
/// rows, or `failed` rows whose `next_retry_at` has passed. Uses
/// `FOR UPDATE SKIP LOCKED` so concurrent publishers never claim the same
/// row. The caller MUST follow up with `outbox_mark_published` or
/// `outbox_mark_failed`.
#[cfg(feature = "runtime-claim")]
pub async fn outbox_claim_batch(
    pool: &PgPool,
    batch_size: i64,
    publisher_id: &str,
) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(&format!(
        r#"
        with to_claim as (
            select id
            from outbox_events
            where status = 'pending'
               or (status = 'failed' and next_retry_at <= now())
            order by id asc
            limit $1
            for update skip locked
        )
        update outbox_events
           set status = 'processing',
               claimed_by = $2
         where id in (select id from to_claim)
        returning {OUTBOX_COLUMNS}
        "#
    ))
    .bind(batch_size)
    .bind(publisher_id)
    .fetch_all(pool)
    .await
    .context("outbox_claim_batch failed")?;

    rows.into_iter().map(outbox_from_row).collect()
}

/// Release a `processing` row back to `pending` (e.g. the publisher crashed
/// before attempting to publish).
pub async fn outbox_release_claim(pool: &PgPool, event_id: Uuid) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status = 'pending',
               claimed_by = null
         where event_id = $1
           and status = 'processing'
        returning id
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await
    .context("outbox_release_claim failed")?;
    Ok(row.is_some())
}

/// Mark a `processing` row `published` (§4.4 step 3). Returns `false` if the
/// row was not `processing` (already published by a racing redelivery, or
/// released) — the publisher should treat this as already-handled, not an error.
pub async fn outbox_mark_published(pool: &PgPool, event_id: Uuid) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status = 'published',
               published_at = now()
         where event_id = $1
           and status = 'processing'
        returning id
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await
    .context("outbox_mark_published failed")?;
    Ok(row.is_some())
}

/// Record a publish failure (§4.4 step 4). Bumps `retry_count`, sets
/// `status = 'failed'`, and schedules `next_retry_at = now() +
/// 2^min(retry_count, 6) minutes`, unless `retry_count` has now reached
/// [`judge_schemas::OUTBOX_RETRY_CAP`], in which case `next_retry_at` is left
/// `null` — escalated for operator attention rather than retried forever
/// (§8 invariant 2).
pub async fn outbox_mark_failed(pool: &PgPool, event_id: Uuid, error: &str) -> Result<OutboxEvent> {
    let row = sqlx::query(&format!(
        r#"
        update outbox_events
           set retry_count = retry_count + 1,
               last_error = $2,
               claimed_by = null,
               status = 'failed',
               next_retry_at = case when retry_count + 1 >= 10 then null
                                     else now() + (power(2, least(retry_count + 1, 6))::int || ' minutes')::interval
                               end
         where event_id = $1
           and status = 'processing'
        returning {OUTBOX_COLUMNS}
        "#
    ))
    .bind(event_id)
    .bind(error)
    .fetch_optional(pool)
    .await
    .context("outbox_mark_failed failed")?
    .ok_or_else(|| anyhow!("outbox_mark_failed: event {event_id} was not in processing state"))?;

    outbox_from_row(row)
}

pub async fn outbox_fetch_by_event_id(pool: &PgPool, event_id: Uuid) -> Result<Option<OutboxEvent>> {
    let row = sqlx::query(&format!(
        "select {OUTBOX_COLUMNS} from outbox_events where event_id = $1"
    ))
    .bind(event_id)
    .fetch_optional(pool)
    .await
    .context("outbox_fetch_by_event_id failed")?;

    row.map(outbox_from_row).transpose()
}

/// List rows that exhausted their retry budget (§4.4 step 5, surfaced by the
/// daemon's `/v1/outbox/escalated` endpoint). A `failed` row with a
/// `next_retry_at` still set is merely awaiting its next scheduled retry,
/// not escalated, so this excludes it.
pub async fn list_escalated_outbox(pool: &PgPool) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(&format!(
        "select {OUTBOX_COLUMNS} from outbox_events where status = 'failed' and next_retry_at is null order by id asc"
    ))
    .fetch_all(pool)
    .await
    .context("list_escalated_outbox failed")?;

    rows.into_iter().map(outbox_from_row).collect()
}
