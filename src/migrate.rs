use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the queue schema on a fresh connection (`tutor init`).
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the queue schema on an existing pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per queued message. `visible_at` hides leased messages until
    // their lease expires; `lease` identifies the current holder.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            visible_at INTEGER NOT NULL,
            dequeue_count INTEGER NOT NULL DEFAULT 0,
            lease TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_visible ON jobs(visible_at, seq)")
        .execute(pool)
        .await?;

    Ok(())
}
