//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};

use super::{Job, JobFilter, JobStatus, JobStore, JobStoreError};

const JOB_COLUMNS: &str = "id, status, input_ref, output_refs, config, attempt, max_attempts, \
     last_error, priority, client_ref, cancel_requested, retry_at, lease_expires_at, version, \
     created_at, updated_at, progress";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

fn db_error(e: rusqlite::Error) -> JobStoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            JobStoreError::Unavailable(e.to_string())
        }
        _ => JobStoreError::Database(e.to_string()),
    }
}

fn conversion_error(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(column: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|e| conversion_error(column, e))
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(db_error)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                input_ref TEXT NOT NULL,
                output_refs TEXT NOT NULL DEFAULT '[]',
                config TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                client_ref TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                retry_at TEXT,
                lease_expires_at TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                progress TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_client_ref ON jobs(client_ref);
            CREATE INDEX IF NOT EXISTS idx_jobs_priority ON jobs(priority DESC, created_at ASC);
            "#,
        )
        .map_err(db_error)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref client_ref) = filter.client_ref {
            conditions.push("client_ref = ?");
            params.push(Box::new(client_ref.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get(1)?;
        let output_refs_json: String = row.get(3)?;
        let config_json: String = row.get(4)?;
        let last_error_json: Option<String> = row.get(7)?;
        let retry_at: Option<String> = row.get(11)?;
        let lease_expires_at: Option<String> = row.get(12)?;
        let created_at: String = row.get(14)?;
        let updated_at: String = row.get(15)?;
        let progress_json: Option<String> = row.get(16)?;

        let status = status_str.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(Job {
            id: row.get(0)?,
            status,
            input_ref: row.get(2)?,
            output_refs: parse_json(3, &output_refs_json)?,
            config: parse_json(4, &config_json)?,
            attempt: row.get(5)?,
            max_attempts: row.get(6)?,
            last_error: last_error_json
                .as_deref()
                .map(|json| parse_json(7, json))
                .transpose()?,
            priority: row.get(8)?,
            client_ref: row.get(9)?,
            cancel_requested: row.get(10)?,
            progress: progress_json
                .as_deref()
                .map(|json| parse_json(16, json))
                .transpose()?,
            retry_at: retry_at.as_deref().map(|t| parse_time(11, t)).transpose()?,
            lease_expires_at: lease_expires_at
                .as_deref()
                .map(|t| parse_time(12, t))
                .transpose()?,
            version: row.get(13)?,
            created_at: parse_time(14, &created_at)?,
            updated_at: parse_time(15, &updated_at)?,
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<Job>, JobStoreError> {
        let result = conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_error(e)),
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self, job: &Job) -> Result<Job, JobStoreError> {
        let conn = self.lock()?;

        let output_refs_json = serde_json::to_string(&job.output_refs)?;
        let config_json = serde_json::to_string(&job.config)?;
        let last_error_json = job.last_error.as_ref().map(serde_json::to_string).transpose()?;
        let progress_json = job.progress.as_ref().map(serde_json::to_string).transpose()?;

        let result = conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.status.as_str(),
                job.input_ref,
                output_refs_json,
                config_json,
                job.attempt,
                job.max_attempts,
                last_error_json,
                job.priority,
                job.client_ref,
                job.cancel_requested,
                job.retry_at.map(|t| t.to_rfc3339()),
                job.lease_expires_at.map(|t| t.to_rfc3339()),
                job.version,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                progress_json,
            ],
        );

        match result {
            Ok(_) => Ok(job.clone()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(JobStoreError::AlreadyExists(job.id.clone()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.lock()?;
        Self::get_locked(&conn, id)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY priority DESC, created_at ASC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_error)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(db_error)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(db_error)?);
        }

        Ok(jobs)
    }

    async fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_error)
    }

    async fn compare_and_set(&self, next: &Job) -> Result<Job, JobStoreError> {
        let conn = self.lock()?;

        let now = Utc::now();
        let output_refs_json = serde_json::to_string(&next.output_refs)?;
        let config_json = serde_json::to_string(&next.config)?;
        let last_error_json = next
            .last_error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let progress_json = next.progress.as_ref().map(serde_json::to_string).transpose()?;

        let updated = conn
            .execute(
                "UPDATE jobs SET status = ?, output_refs = ?, config = ?, attempt = ?, \
                 max_attempts = ?, last_error = ?, priority = ?, cancel_requested = ?, \
                 progress = ?, retry_at = ?, lease_expires_at = ?, version = version + 1, \
                 updated_at = ? WHERE id = ? AND version = ?",
                params![
                    next.status.as_str(),
                    output_refs_json,
                    config_json,
                    next.attempt,
                    next.max_attempts,
                    last_error_json,
                    next.priority,
                    next.cancel_requested,
                    progress_json,
                    next.retry_at.map(|t| t.to_rfc3339()),
                    next.lease_expires_at.map(|t| t.to_rfc3339()),
                    now.to_rfc3339(),
                    next.id,
                    next.version,
                ],
            )
            .map_err(db_error)?;

        if updated == 1 {
            return Ok(Job {
                version: next.version + 1,
                updated_at: now,
                ..next.clone()
            });
        }

        match Self::get_locked(&conn, &next.id)? {
            Some(_) => Err(JobStoreError::Conflict {
                job_id: next.id.clone(),
                expected_version: next.version,
            }),
            None => Err(JobStoreError::NotFound(next.id.clone())),
        }
    }
}
