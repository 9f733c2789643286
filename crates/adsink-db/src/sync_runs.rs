//! Ledger operations for `sync_runs` and `sync_jobs`.
//!
//! A run owns its jobs (cascade). Status transitions are guarded: updates
//! require the expected current status and report an invalid transition when
//! `rows_affected` comes back zero.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use adsink_core::DateRange;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `sync_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub tenant_id: String,
    pub connection_id: String,
    pub trigger_source: String,
    pub lookback_days: i32,
    pub force_refetch: bool,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs_total: i32,
    pub jobs_succeeded: i32,
    pub jobs_failed: i32,
    pub rows_written: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncRunRow {
    /// Whether the run has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "completed" | "partial" | "error" | "cancelled"
        )
    }
}

/// A row from the `sync_jobs` table: one request-sized chunk of work.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncJobRow {
    pub id: i64,
    pub sync_run_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
    pub attempts: i32,
    pub rows_written: i32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "id, public_id, tenant_id, connection_id, trigger_source, \
     lookback_days, force_refetch, status, started_at, finished_at, \
     jobs_total, jobs_succeeded, jobs_failed, rows_written, error_message, created_at";

const JOB_COLUMNS: &str = "id, sync_run_id, start_date, end_date, status, attempts, \
     rows_written, last_error, started_at, finished_at, created_at";

// ---------------------------------------------------------------------------
// sync_runs operations
// ---------------------------------------------------------------------------

/// Creates a new sync run in `queued` status with the caller-supplied public id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_sync_run(
    pool: &PgPool,
    public_id: Uuid,
    tenant_id: &str,
    connection_id: &str,
    trigger_source: &str,
    lookback_days: i32,
    force_refetch: bool,
) -> Result<SyncRunRow, DbError> {
    let sql = format!(
        "INSERT INTO sync_runs \
             (public_id, tenant_id, connection_id, trigger_source, lookback_days, force_refetch, status) \
         VALUES ($1, $2, $3, $4, $5, $6, 'queued') \
         RETURNING {RUN_COLUMNS}"
    );

    let row = sqlx::query_as::<_, SyncRunRow>(&sql)
        .bind(public_id)
        .bind(tenant_id)
        .bind(connection_id)
        .bind(trigger_source)
        .bind(lookback_days)
        .bind(force_refetch)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// Marks a run as `running`, sets `started_at = NOW()` and `jobs_total`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `queued`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn start_sync_run(pool: &PgPool, id: i64, jobs_total: i32) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_runs \
         SET status = 'running', started_at = NOW(), jobs_total = $1 \
         WHERE id = $2 AND status = 'queued'",
    )
    .bind(jobs_total)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "queued",
        });
    }

    Ok(())
}

/// Moves a run to a terminal status and records the final job tallies.
///
/// `status` must be one of `completed`, `partial`, `error`, `cancelled`.
/// Accepts runs in `queued` as well as `running` so an empty run (no gaps)
/// can complete without ever starting.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is already terminal,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn finish_sync_run(
    pool: &PgPool,
    id: i64,
    status: &str,
    jobs_succeeded: i32,
    jobs_failed: i32,
    rows_written: i64,
    error_message: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_runs \
         SET status = $1, finished_at = NOW(), jobs_succeeded = $2, \
             jobs_failed = $3, rows_written = $4, error_message = $5 \
         WHERE id = $6 AND status IN ('queued', 'running')",
    )
    .bind(status)
    .bind(jobs_succeeded)
    .bind(jobs_failed)
    .bind(rows_written)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "queued or running",
        });
    }

    Ok(())
}

/// Fetches a run by its public UUID.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no such run exists, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn get_run_by_public_id(pool: &PgPool, public_id: Uuid) -> Result<SyncRunRow, DbError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE public_id = $1");
    let row = sqlx::query_as::<_, SyncRunRow>(&sql)
        .bind(public_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns the most recent run for a tenant, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_run_for_tenant(
    pool: &PgPool,
    tenant_id: &str,
) -> Result<Option<SyncRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM sync_runs \
         WHERE tenant_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, SyncRunRow>(&sql)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Returns the most recent `limit` runs for a tenant, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_runs_for_tenant(
    pool: &PgPool,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<SyncRunRow>, DbError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM sync_runs \
         WHERE tenant_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    );
    let rows = sqlx::query_as::<_, SyncRunRow>(&sql)
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// sync_jobs operations
// ---------------------------------------------------------------------------

/// Inserts one pending job per chunk, preserving chunk order, and returns
/// the created rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails.
pub async fn create_sync_jobs(
    pool: &PgPool,
    sync_run_id: i64,
    chunks: &[DateRange],
) -> Result<Vec<SyncJobRow>, DbError> {
    let sql = format!(
        "INSERT INTO sync_jobs (sync_run_id, start_date, end_date) \
         VALUES ($1, $2, $3) \
         RETURNING {JOB_COLUMNS}"
    );

    let mut jobs = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let row = sqlx::query_as::<_, SyncJobRow>(&sql)
            .bind(sync_run_id)
            .bind(chunk.start)
            .bind(chunk.end)
            .fetch_one(pool)
            .await?;
        jobs.push(row);
    }

    Ok(jobs)
}

/// Marks a job as `running` and sets `started_at = NOW()`.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job is not `pending`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn mark_job_running(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_jobs \
         SET status = 'running', started_at = NOW() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidJobTransition {
            id,
            expected_status: "pending",
        });
    }

    Ok(())
}

/// Marks a job `completed` with its attempt count and rows written.
///
/// `note` records a row-level discrepancy when a batch write partially
/// failed; the job still counts as completed because data landed.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_sync_job(
    pool: &PgPool,
    id: i64,
    attempts: i32,
    rows_written: i32,
    note: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_jobs \
         SET status = 'completed', finished_at = NOW(), attempts = $1, \
             rows_written = $2, last_error = $3 \
         WHERE id = $4 AND status = 'running'",
    )
    .bind(attempts)
    .bind(rows_written)
    .bind(note)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidJobTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a job `failed` with its attempt count and last error.
///
/// Accepts jobs in `pending` as well as `running`: jobs that were never
/// dispatched (cancellation, run deadline) fail directly from `pending`.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job is already terminal,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn fail_sync_job(
    pool: &PgPool,
    id: i64,
    attempts: i32,
    error: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_jobs \
         SET status = 'failed', finished_at = NOW(), attempts = $1, last_error = $2 \
         WHERE id = $3 AND status IN ('pending', 'running')",
    )
    .bind(attempts)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidJobTransition {
            id,
            expected_status: "pending or running",
        });
    }

    Ok(())
}

/// Returns all jobs of a run in chunk (creation) order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_sync_jobs(pool: &PgPool, sync_run_id: i64) -> Result<Vec<SyncJobRow>, DbError> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM sync_jobs \
         WHERE sync_run_id = $1 \
         ORDER BY id"
    );
    let rows = sqlx::query_as::<_, SyncJobRow>(&sql)
        .bind(sync_run_id)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_status(status: &str) -> SyncRunRow {
        SyncRunRow {
            id: 1,
            public_id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            connection_id: "act_1".to_string(),
            trigger_source: "api".to_string(),
            lookback_days: 90,
            force_refetch: false,
            status: status.to_string(),
            started_at: None,
            finished_at: None,
            jobs_total: 0,
            jobs_succeeded: 0,
            jobs_failed: 0,
            rows_written: 0,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_statuses_are_recognized() {
        for status in ["completed", "partial", "error", "cancelled"] {
            assert!(run_with_status(status).is_terminal(), "{status}");
        }
        for status in ["queued", "running"] {
            assert!(!run_with_status(status).is_terminal(), "{status}");
        }
    }
}
