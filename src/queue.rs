//! Durable job queue.
//!
//! Decouples `POST /start-job` from generation. Messages are opaque JSON
//! strings persisted in SQLite and delivered at least once:
//!
//! 1. [`send`](JobQueue::send) appends a message.
//! 2. [`receive`](JobQueue::receive) leases the oldest visible message,
//!    hiding it for the visibility timeout and bumping its dequeue count.
//! 3. [`ack`](JobQueue::ack) deletes it, but only for the current lease
//!    holder. A worker that dies before acking lets the lease lapse and the
//!    message is delivered again.
//!
//! Ordering is near-FIFO: the oldest visible message is always chosen, but
//! redelivered messages keep their original position.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::{db, migrate};

/// A leased message.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: String,
    pub payload: String,
    /// Deliveries so far, including this one.
    pub dequeue_count: u32,
    lease: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue an opaque payload, returning the message id.
    async fn send(&self, payload: &str) -> Result<String>;

    /// Lease the next visible message, if any.
    async fn receive(&self) -> Result<Option<QueuedMessage>>;

    /// Delete a leased message. Returns `false` when the lease had already
    /// lapsed and another receiver holds the message.
    async fn ack(&self, message: &QueuedMessage) -> Result<bool>;

    /// Messages currently stored, leased or not.
    async fn len(&self) -> Result<u64>;
}

/// SQLite-backed [`JobQueue`].
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    visibility_timeout: Duration,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
        }
    }

    /// Open the configured database and make sure the schema exists.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(
            pool,
            Duration::from_secs(config.queue.visibility_timeout_secs),
        ))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn send(&self, payload: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        sqlx::query(
            "INSERT INTO jobs (id, payload, enqueued_at, visible_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue job")?;
        Ok(id)
    }

    async fn receive(&self) -> Result<Option<QueuedMessage>> {
        let now = now_millis();
        let hidden_until = now + self.visibility_timeout.as_millis() as i64;
        let lease = uuid::Uuid::new_v4().to_string();

        // Single statement, so concurrent receivers cannot lease the same row.
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET visible_at = ?, lease = ?, dequeue_count = dequeue_count + 1
            WHERE seq = (
                SELECT seq FROM jobs WHERE visible_at <= ? ORDER BY seq LIMIT 1
            )
            RETURNING id, payload, dequeue_count
            "#,
        )
        .bind(hidden_until)
        .bind(&lease)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to receive job")?;

        Ok(row.map(|row| QueuedMessage {
            id: row.get("id"),
            payload: row.get("payload"),
            dequeue_count: row.get::<i64, _>("dequeue_count") as u32,
            lease,
        }))
    }

    async fn ack(&self, message: &QueuedMessage) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND lease = ?")
            .bind(&message.id)
            .bind(&message.lease)
            .execute(&self.pool)
            .await
            .context("Failed to acknowledge job")?;
        Ok(result.rows_affected() == 1)
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn queue(tmp: &TempDir, visibility: Duration) -> SqliteJobQueue {
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("queue.sqlite");
        let mut q = SqliteJobQueue::connect(&config).await.unwrap();
        q.visibility_timeout = visibility;
        q
    }

    #[tokio::test]
    async fn send_receive_ack() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp, Duration::from_secs(60)).await;

        q.send(r#"{"repo_url":"a"}"#).await.unwrap();
        assert_eq!(q.len().await.unwrap(), 1);

        let msg = q.receive().await.unwrap().unwrap();
        assert_eq!(msg.payload, r#"{"repo_url":"a"}"#);
        assert_eq!(msg.dequeue_count, 1);

        assert!(q.ack(&msg).await.unwrap());
        assert_eq!(q.len().await.unwrap(), 0);
        assert!(q.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leased_message_is_hidden() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp, Duration::from_secs(60)).await;
        q.send("one").await.unwrap();

        let _held = q.receive().await.unwrap().unwrap();
        assert!(q.receive().await.unwrap().is_none());
        assert_eq!(q.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lapsed_lease_redelivers() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp, Duration::ZERO).await;
        q.send("job").await.unwrap();

        let first = q.receive().await.unwrap().unwrap();
        let second = q.receive().await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.dequeue_count, 2);

        // The stale holder can no longer delete it.
        assert!(!q.ack(&first).await.unwrap());
        assert!(q.ack(&second).await.unwrap());
    }

    #[tokio::test]
    async fn oldest_message_first() {
        let tmp = TempDir::new().unwrap();
        let q = queue(&tmp, Duration::from_secs(60)).await;
        for payload in ["a", "b", "c"] {
            q.send(payload).await.unwrap();
        }
        let mut seen = Vec::new();
        while let Some(msg) = q.receive().await.unwrap() {
            seen.push(msg.payload.clone());
            q.ack(&msg).await.unwrap();
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
