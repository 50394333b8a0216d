//! `judge submission` subcommands: read-only operator diagnostics over the
//! Submission Store (§4.6). Submission intake itself is the API layer's
//! job (§1 "explicitly out of scope"); this crate only inspects state the
//! judge core already produced.

use anyhow::Result;

pub async fn status(id: i64) -> Result<()> {
    let pool = judge_db::connect_from_env().await?;
    let submission = judge_db::fetch_submission(&pool, id).await?;

    println!("id={}", submission.id);
    println!("owner_id={}", submission.owner_id);
    println!("problem_id={}", submission.problem_id);
    println!("language={}", submission.language);
    println!("verdict={}", submission.verdict.as_str());
    println!("score={}", submission.score);
    println!("tests_passed={}/{}", submission.tests_passed, submission.tests_total);
    println!("wall_ms={}", submission.wall_ms);
    println!("memory_kb={}", submission.memory_kb);
    println!("submitted_at={}", submission.submitted_at.to_rfc3339());
    println!(
        "judged_at={}",
        submission
            .judged_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    );

    let results = judge_db::list_test_results(&pool, id).await?;
    for result in results {
        println!(
            "test ordinal={} verdict={} wall_ms={} memory_kb={}",
            result.ordinal,
            result.verdict.as_str(),
            result.wall_ms,
            result.memory_kb,
        );
    }

    Ok(())
}

pub async fn workers() -> Result<()> {
    let pool = judge_db::connect_from_env().await?;
    let workers = judge_db::list_workers(&pool).await?;

    for worker in workers {
        println!(
            "name={} status={:?} sandbox_id={} current_submission_id={} last_heartbeat={}",
            worker.name,
            worker.status,
            worker.sandbox_id,
            worker
                .current_submission_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            worker.last_heartbeat.to_rfc3339(),
        );
    }

    Ok(())
}

pub async fn escalated_outbox() -> Result<()> {
    let pool = judge_db::connect_from_env().await?;
    let events = judge_db::list_escalated_outbox(&pool).await?;

    for event in events {
        println!(
            "event_id={} event_type={} aggregate_id={} retry_count={} last_error={}",
            event.event_id,
            event.event_type,
            event.aggregate_id,
            event.retry_count,
            event.last_error.unwrap_or_default(),
        );
    }

    Ok(())
}
