//! Read-side sync status: a poll-safe view over the run/job ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use adsink_db::{SyncJobRow, SyncRunRow};

use crate::EngineError;

/// Tenant-facing rollup of one run's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// At least one job has not reached a terminal state yet.
    Syncing,
    /// Every job completed.
    Completed,
    /// At least one job completed and at least one failed for good.
    Partial,
    /// Every job failed.
    Error,
    Cancelled,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Syncing => write!(f, "syncing"),
            OverallStatus::Completed => write!(f, "completed"),
            OverallStatus::Partial => write!(f, "partial"),
            OverallStatus::Error => write!(f, "error"),
            OverallStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
    pub attempts: i32,
    pub rows_written: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub overall_status: OverallStatus,
    pub jobs_total: i32,
    pub jobs_completed: i32,
    pub jobs_failed: i32,
    pub progress_pct: u8,
    pub rows_written: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub jobs: Vec<JobDetail>,
}

/// Decides the terminal status string the ledger records for a finished run.
#[must_use]
pub fn reduce_run_status(
    jobs_total: usize,
    jobs_succeeded: usize,
    jobs_failed: usize,
    cancelled: bool,
) -> &'static str {
    if cancelled {
        "cancelled"
    } else if jobs_total == 0 || jobs_failed == 0 {
        "completed"
    } else if jobs_succeeded == 0 {
        "error"
    } else {
        "partial"
    }
}

/// Builds the poll view for one run. Safe to call at any time, including
/// long after the run finished — the ledger keeps the terminal state.
///
/// # Errors
///
/// Returns [`EngineError::RunNotFound`] for an unknown run id, or
/// [`EngineError::Db`] if the ledger cannot be read.
pub async fn status_for_run(pool: &PgPool, run_id: Uuid) -> Result<SyncStatus, EngineError> {
    let run = adsink_db::get_run_by_public_id(pool, run_id)
        .await
        .map_err(|e| match e {
            adsink_db::DbError::NotFound => EngineError::RunNotFound,
            other => EngineError::Db(other),
        })?;
    let jobs = adsink_db::list_sync_jobs(pool, run.id).await?;

    Ok(build_status(&run, &jobs))
}

/// The most recent run's status for a tenant, if the tenant has ever synced.
///
/// # Errors
///
/// Returns [`EngineError::Db`] if the ledger cannot be read.
pub async fn latest_status_for_tenant(
    pool: &PgPool,
    tenant_id: &str,
) -> Result<Option<SyncStatus>, EngineError> {
    let Some(run) = adsink_db::latest_run_for_tenant(pool, tenant_id).await? else {
        return Ok(None);
    };
    let jobs = adsink_db::list_sync_jobs(pool, run.id).await?;

    Ok(Some(build_status(&run, &jobs)))
}

fn build_status(run: &SyncRunRow, jobs: &[SyncJobRow]) -> SyncStatus {
    let jobs_completed = jobs.iter().filter(|j| j.status == "completed").count();
    let jobs_failed = jobs.iter().filter(|j| j.status == "failed").count();
    let terminal = jobs_completed + jobs_failed;

    let overall_status = overall_from(run, jobs_completed, jobs_failed);

    #[allow(clippy::cast_possible_truncation)]
    let progress_pct = if jobs.is_empty() {
        100
    } else {
        ((terminal * 100) / jobs.len()) as u8
    };

    let rows_written = if run.is_terminal() {
        run.rows_written
    } else {
        jobs.iter().map(|j| i64::from(j.rows_written)).sum()
    };

    SyncStatus {
        run_id: run.public_id,
        tenant_id: run.tenant_id.clone(),
        overall_status,
        jobs_total: run.jobs_total.max(i32::try_from(jobs.len()).unwrap_or(i32::MAX)),
        jobs_completed: i32::try_from(jobs_completed).unwrap_or(i32::MAX),
        jobs_failed: i32::try_from(jobs_failed).unwrap_or(i32::MAX),
        progress_pct,
        rows_written,
        started_at: run.started_at,
        finished_at: run.finished_at,
        error_message: run.error_message.clone(),
        jobs: jobs
            .iter()
            .map(|j| JobDetail {
                start_date: j.start_date,
                end_date: j.end_date,
                status: j.status.clone(),
                attempts: j.attempts,
                rows_written: j.rows_written,
                last_error: j.last_error.clone(),
            })
            .collect(),
    }
}

/// Maps the ledger to the user-facing status. A terminal run row is
/// authoritative; otherwise the jobs decide, and any non-terminal job means
/// the run is still syncing.
fn overall_from(run: &SyncRunRow, jobs_completed: usize, jobs_failed: usize) -> OverallStatus {
    match run.status.as_str() {
        "completed" => OverallStatus::Completed,
        "partial" => OverallStatus::Partial,
        "error" => OverallStatus::Error,
        "cancelled" => OverallStatus::Cancelled,
        _ => {
            let total = usize::try_from(run.jobs_total.max(0)).unwrap_or(0);
            if jobs_completed + jobs_failed < total || total == 0 {
                OverallStatus::Syncing
            } else if jobs_failed == 0 {
                OverallStatus::Completed
            } else if jobs_completed == 0 {
                OverallStatus::Error
            } else {
                OverallStatus::Partial
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: &str, jobs_total: i32) -> SyncRunRow {
        SyncRunRow {
            id: 1,
            public_id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            connection_id: "act_1".to_string(),
            trigger_source: "api".to_string(),
            lookback_days: 90,
            force_refetch: false,
            status: status.to_string(),
            started_at: Some(Utc::now()),
            finished_at: None,
            jobs_total,
            jobs_succeeded: 0,
            jobs_failed: 0,
            rows_written: 0,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    fn job(status: &str, rows: i32) -> SyncJobRow {
        SyncJobRow {
            id: 1,
            sync_run_id: 1,
            start_date: "2026-03-01".parse().expect("valid date"),
            end_date: "2026-03-05".parse().expect("valid date"),
            status: status.to_string(),
            attempts: 1,
            rows_written: rows,
            last_error: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reduce_covers_all_terminal_shapes() {
        assert_eq!(reduce_run_status(0, 0, 0, false), "completed");
        assert_eq!(reduce_run_status(4, 4, 0, false), "completed");
        assert_eq!(reduce_run_status(4, 2, 2, false), "partial");
        assert_eq!(reduce_run_status(4, 0, 4, false), "error");
        assert_eq!(reduce_run_status(4, 3, 1, true), "cancelled");
    }

    #[test]
    fn running_run_with_open_jobs_is_syncing() {
        let status = build_status(
            &run("running", 3),
            &[job("completed", 10), job("running", 0), job("pending", 0)],
        );
        assert_eq!(status.overall_status, OverallStatus::Syncing);
        assert_eq!(status.progress_pct, 33);
        assert_eq!(status.jobs_completed, 1);
        assert_eq!(status.rows_written, 10);
    }

    #[test]
    fn all_jobs_terminal_maps_to_partial_when_mixed() {
        let status = build_status(
            &run("running", 2),
            &[job("completed", 10), job("failed", 0)],
        );
        assert_eq!(status.overall_status, OverallStatus::Partial);
        assert_eq!(status.progress_pct, 100);
    }

    #[test]
    fn terminal_run_row_is_authoritative() {
        let mut r = run("cancelled", 2);
        r.rows_written = 25;
        let status = build_status(&r, &[job("completed", 10), job("failed", 0)]);
        assert_eq!(status.overall_status, OverallStatus::Cancelled);
        assert_eq!(status.rows_written, 25);
    }

    #[test]
    fn empty_run_reports_complete() {
        let mut r = run("completed", 0);
        r.finished_at = Some(Utc::now());
        let status = build_status(&r, &[]);
        assert_eq!(status.overall_status, OverallStatus::Completed);
        assert_eq!(status.progress_pct, 100);
        assert_eq!(status.jobs_total, 0);
    }

    #[test]
    fn status_serializes_for_polling_clients() {
        let status = build_status(&run("running", 1), &[job("running", 0)]);
        let json = serde_json::to_string(&status).expect("serialize status");
        assert!(json.contains("\"overall_status\":\"syncing\""));
        assert!(json.contains("\"progress_pct\":0"));
    }
}
