//! SQLite-backed work queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tokio::sync::Notify;
use tracing::debug;

use super::config::QueueConfig;
use super::types::{Lease, QueueError, WorkQueue};

/// Work queue persisted in a SQLite table. Messages survive restarts;
/// leases are timestamps, so a crashed consumer's lease simply runs out.
pub struct SqliteWorkQueue {
    conn: Mutex<Connection>,
    notify: Notify,
    visibility_timeout: chrono::Duration,
    poll_interval: Duration,
}

fn db_error(e: rusqlite::Error) -> QueueError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            QueueError::Busy(e.to_string())
        }
        _ => QueueError::Database(e.to_string()),
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Rounded up, so a message never becomes visible before `at`.
fn ceil_millis(at: DateTime<Utc>) -> i64 {
    let ms = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        ms
    } else {
        ms + 1
    }
}

impl SqliteWorkQueue {
    /// Open (or create) the queue table in the database at `path`.
    pub fn new(path: &Path, config: &QueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(db_error)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_error)?;
        Self::with_connection(conn, config)
    }

    /// In-memory queue (useful for testing).
    pub fn in_memory(config: &QueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: &QueueConfig) -> Result<Self, QueueError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notify: Notify::new(),
            visibility_timeout: chrono::Duration::seconds(config.visibility_timeout_secs as i64),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                not_before INTEGER NOT NULL,
                leased_until INTEGER,
                receipt TEXT,
                delivery_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_ready ON queue_messages(priority DESC, not_before);
            CREATE INDEX IF NOT EXISTS idx_queue_job ON queue_messages(job_id);
            "#,
        )
        .map_err(db_error)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Database("connection lock poisoned".to_string()))
    }

    fn lease_next(&self, now: DateTime<Utc>) -> Result<Option<Lease>, QueueError> {
        let mut conn = self.lock()?;
        // Take the write lock up front so competing consumers wait on busy_timeout
        // instead of failing a lock upgrade.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_error)?;
        let now_ms = now.timestamp_millis();

        // Ready, not leased, and no sibling message of the same job holds a live lease.
        let candidate: Option<(i64, String, u32)> = tx
            .query_row(
                r#"
                SELECT m.id, m.job_id, m.delivery_count FROM queue_messages m
                WHERE m.not_before <= ?1
                  AND (m.leased_until IS NULL OR m.leased_until <= ?1)
                  AND NOT EXISTS (
                      SELECT 1 FROM queue_messages o
                      WHERE o.job_id = m.job_id AND o.id != m.id AND o.leased_until > ?1
                  )
                ORDER BY m.priority DESC, m.not_before ASC, m.id ASC
                LIMIT 1
                "#,
                params![now_ms],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_error)?;

        let Some((message_id, job_id, delivery_count)) = candidate else {
            return Ok(None);
        };

        let leased_until = now + self.visibility_timeout;
        let receipt = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "UPDATE queue_messages SET leased_until = ?, receipt = ?, delivery_count = delivery_count + 1 WHERE id = ?",
            params![leased_until.timestamp_millis(), receipt, message_id],
        )
        .map_err(db_error)?;
        tx.commit().map_err(db_error)?;

        Ok(Some(Lease {
            message_id,
            job_id,
            receipt,
            delivery_count: delivery_count + 1,
            leased_until: from_millis(leased_until.timestamp_millis()),
        }))
    }
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    async fn enqueue(
        &self,
        job_id: &str,
        not_before: DateTime<Utc>,
        priority: u16,
    ) -> Result<(), QueueError> {
        {
            let conn = self.lock()?;
            let now_ms = Utc::now().timestamp_millis();

            // Reschedule a pending message for the job instead of adding a second one.
            let updated = conn
                .execute(
                    "UPDATE queue_messages SET not_before = ?, priority = ? \
                     WHERE job_id = ? AND (leased_until IS NULL OR leased_until <= ?)",
                    params![ceil_millis(not_before), priority, job_id, now_ms],
                )
                .map_err(db_error)?;

            if updated == 0 {
                conn.execute(
                    "INSERT INTO queue_messages (job_id, priority, not_before, enqueued_at) VALUES (?, ?, ?, ?)",
                    params![job_id, priority, ceil_millis(not_before), now_ms],
                )
                .map_err(db_error)?;
            }
        }

        debug!("Enqueued job {} (not before {})", job_id, not_before);
        self.notify.notify_one();
        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<Lease>, QueueError> {
        self.lease_next(Utc::now())
    }

    async fn dequeue(&self) -> Result<Lease, QueueError> {
        loop {
            if let Some(lease) = self.lease_next(Utc::now())? {
                debug!(
                    "Leased job {} (delivery {})",
                    lease.job_id, lease.delivery_count
                );
                return Ok(lease);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<bool, QueueError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM queue_messages WHERE id = ? AND receipt = ?",
                params![lease.message_id, lease.receipt],
            )
            .map_err(db_error)?;
        Ok(deleted == 1)
    }

    async fn contains(&self, job_id: &str) -> Result<bool, QueueError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE job_id = ?",
                params![job_id],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count > 0)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let conn = self.lock()?;
        let now_ms = Utc::now().timestamp_millis();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE leased_until IS NULL OR leased_until <= ?",
                params![now_ms],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count as u64)
    }

    async fn leased_jobs(&self) -> Result<Vec<String>, QueueError> {
        let conn = self.lock()?;
        let now_ms = Utc::now().timestamp_millis();
        let mut stmt = conn
            .prepare("SELECT job_id FROM queue_messages WHERE leased_until > ? ORDER BY id")
            .map_err(db_error)?;
        let rows = stmt
            .query_map(params![now_ms], |row| row.get::<_, String>(0))
            .map_err(db_error)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(db_error)?);
        }
        Ok(jobs)
    }
}
