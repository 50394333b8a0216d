//! Migrating twice on a clean DB must be idempotent.
//!
//! DB-backed test, skipped if `JUDGE_DATABASE_URL` is not set.

#[tokio::test]
async fn migrate_idempotent_on_clean_db() -> anyhow::Result<()> {
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
    judge_db::migrate(&pool).await?;

    let status = judge_db::status(&pool).await?;
    assert!(status.ok);
    assert!(status.has_submissions_table);

    Ok(())
}
