//! Outbox enqueue is idempotent on `event_id`: a redelivered or retried
//! enqueue call must never create a second row for the same event (§4.4,
//! §8 invariant 3).

use judge_schemas::NewOutboxEvent;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn duplicate_event_id_does_not_create_second_row() -> anyhow::Result<()> {
    let url = match std::env::var(judge_db::ENV_DATABASE_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: JUDGE_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    judge_db::migrate(&pool).await?;

    let event_id = Uuid::new_v4();
    let new_event = NewOutboxEvent {
        event_id,
        event_type: "submission.judged".to_string(),
        aggregate_type: "submission".to_string(),
        aggregate_id: 1,
        payload: json!({"submission_id": 1}),
    };

    let first = judge_db::outbox_enqueue(&pool, &new_event).await?;
    assert!(first, "first enqueue must insert a row");

    let second = judge_db::outbox_enqueue(&pool, &new_event).await?;
    assert!(!second, "second enqueue with same event_id must be a no-op");

    let fetched = judge_db::outbox_fetch_by_event_id(&pool, event_id)
        .await?
        .expect("row must exist");
    assert_eq!(fetched.event_id, event_id);

    Ok(())
}
