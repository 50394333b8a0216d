//! `judge db` subcommands: connectivity check and migration.

use anyhow::Result;

pub async fn status() -> Result<()> {
    let pool = judge_db::connect_from_env().await?;
    let s = judge_db::status(&pool).await?;
    println!("db_ok={} has_submissions_table={}", s.ok, s.has_submissions_table);
    Ok(())
}

pub async fn migrate() -> Result<()> {
    let pool = judge_db::connect_from_env().await?;
    judge_db::migrate(&pool).await?;
    println!("migrations_applied=true");
    Ok(())
}
