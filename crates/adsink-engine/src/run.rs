//! Run orchestration: plan gaps into jobs, drive the per-tenant worker
//! pool, and settle the ledger.
//!
//! One invocation = one `SyncRun`. Planning reads the recorded dates, diffs
//! them against the expected calendar, chunks the gaps, and writes one
//! pending job per chunk. Execution works the jobs through a bounded pool:
//! workers race, chunk upserts commute, and one job's failure never aborts
//! its siblings. Rollups are rebuilt once, after every job is terminal.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use adsink_core::{AppConfig, BackfillOptions, DateRange, TenantConfig, TenantEntityKey};
use adsink_db::{NewDailyFact, SyncJobRow, SyncRunRow};
use adsink_insights::{fetch_with_retry, InsightsClient, InsightsError, RetryPolicy};

use crate::chunk::chunk_gaps;
use crate::gaps::{detect_gaps, expected_window};
use crate::pacer::TenantPacer;
use crate::registry::RunRegistry;
use crate::status::{reduce_run_status, status_for_run, SyncStatus};
use crate::EngineError;

/// Engine tuning, resolved once from [`AppConfig`] at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub lookback_days_default: u32,
    pub finality_grace_hours: u32,
    pub max_chunk_days: u32,
    pub max_rows_per_call: u32,
    pub rows_per_day_estimate: u32,
    pub workers_per_tenant: usize,
    pub inter_job_delay: Duration,
    pub run_deadline: Duration,
    pub chunk_latency_estimate: Duration,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            lookback_days_default: config.lookback_days_default,
            finality_grace_hours: config.finality_grace_hours,
            max_chunk_days: config.max_chunk_days,
            max_rows_per_call: config.max_rows_per_call,
            rows_per_day_estimate: config.rows_per_day_estimate,
            workers_per_tenant: config.workers_per_tenant.max(1),
            inter_job_delay: Duration::from_millis(config.inter_job_delay_ms),
            run_deadline: Duration::from_secs(config.run_deadline_secs),
            chunk_latency_estimate: Duration::from_secs(config.chunk_latency_estimate_secs),
            retry: RetryPolicy::from_app_config(config),
        }
    }
}

/// What the trigger API returns: the run is accepted and (if there was
/// work) executing in the background.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub run_id: Uuid,
    pub jobs_scheduled: u32,
    pub estimated_completion: DateTime<Utc>,
}

/// Acknowledgement of a cancellation request. `signalled` is false when the
/// run was already terminal; `status` is current either way.
#[derive(Debug)]
pub struct CancelAck {
    pub signalled: bool,
    pub status: SyncStatus,
}

/// The backfill engine: shared by the HTTP surface, the scheduler, and the
/// CLI. Cheap to clone.
#[derive(Clone)]
pub struct BackfillEngine {
    pool: PgPool,
    client: Arc<InsightsClient>,
    config: EngineConfig,
    registry: Arc<RunRegistry>,
}

enum Planned {
    /// No gaps (or no completed day in the window): the run is already
    /// terminal and there is nothing to execute.
    Empty(StartedRun),
    Work {
        started: StartedRun,
        ctx: Box<RunContext>,
    },
}

struct RunContext {
    pool: PgPool,
    client: Arc<InsightsClient>,
    config: EngineConfig,
    registry: Arc<RunRegistry>,
    cancel_rx: watch::Receiver<bool>,
    run: SyncRunRow,
    jobs: Vec<SyncJobRow>,
    key: TenantEntityKey,
    access_token: String,
}

impl BackfillEngine {
    #[must_use]
    pub fn new(pool: PgPool, client: InsightsClient, config: EngineConfig) -> Self {
        Self {
            pool,
            client: Arc::new(client),
            config,
            registry: Arc::new(RunRegistry::new()),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The options a scheduled (non-forced) run uses for this tenant.
    #[must_use]
    pub fn default_options(&self, tenant: &TenantConfig) -> BackfillOptions {
        BackfillOptions {
            lookback_days: tenant
                .lookback_days
                .unwrap_or(self.config.lookback_days_default),
            force: false,
        }
    }

    /// Plans a run and executes it in the background, returning as soon as
    /// the jobs are scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInProgress`] when the tenant already has a
    /// live run, or [`EngineError::Db`] when planning cannot read or write
    /// the store. A failure to read recorded dates is fatal for the whole
    /// pass — it must never be mistaken for "no gaps".
    pub async fn start_backfill(
        &self,
        tenant: &TenantConfig,
        opts: BackfillOptions,
        trigger_source: &str,
    ) -> Result<StartedRun, EngineError> {
        match self.plan_run(tenant, opts, trigger_source).await? {
            Planned::Empty(started) => Ok(started),
            Planned::Work { started, ctx } => {
                tokio::spawn(execute_run(*ctx));
                Ok(started)
            }
        }
    }

    /// Plans a run and drives it to completion in the foreground (CLI path),
    /// returning the terminal status.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BackfillEngine::start_backfill`].
    pub async fn run_backfill(
        &self,
        tenant: &TenantConfig,
        opts: BackfillOptions,
        trigger_source: &str,
    ) -> Result<SyncStatus, EngineError> {
        let run_id = match self.plan_run(tenant, opts, trigger_source).await? {
            Planned::Empty(started) => started.run_id,
            Planned::Work { started, ctx } => {
                execute_run(*ctx).await;
                started.run_id
            }
        };

        status_for_run(&self.pool, run_id).await
    }

    /// Signals cancellation to a live run. Idempotent: a run that already
    /// finished simply reports its terminal status with `signalled: false`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunNotFound`] for an unknown run id.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<CancelAck, EngineError> {
        let signalled = self.registry.cancel(run_id);
        let status = status_for_run(&self.pool, run_id).await?;
        Ok(CancelAck { signalled, status })
    }

    /// Signals cancellation to every live run (graceful shutdown).
    pub fn cancel_all(&self) {
        self.registry.cancel_all();
    }

    async fn plan_run(
        &self,
        tenant: &TenantConfig,
        opts: BackfillOptions,
        trigger_source: &str,
    ) -> Result<Planned, EngineError> {
        let run_id = Uuid::new_v4();
        let cancel_rx = self.registry.try_register(&tenant.tenant_id, run_id)?;

        match self
            .plan_registered(tenant, opts, trigger_source, run_id, cancel_rx)
            .await
        {
            Ok(planned) => {
                if matches!(planned, Planned::Empty(_)) {
                    self.registry.deregister(&tenant.tenant_id, run_id);
                }
                Ok(planned)
            }
            Err(e) => {
                self.registry.deregister(&tenant.tenant_id, run_id);
                Err(e)
            }
        }
    }

    async fn plan_registered(
        &self,
        tenant: &TenantConfig,
        opts: BackfillOptions,
        trigger_source: &str,
        run_id: Uuid,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<Planned, EngineError> {
        let key = tenant.entity_key();
        let window = expected_window(
            Utc::now(),
            opts.lookback_days,
            self.config.finality_grace_hours,
        );

        let chunks = match window {
            None => Vec::new(),
            Some(window) => {
                let gaps = if opts.force {
                    // Forced re-fetch treats the whole window as missing.
                    vec![window]
                } else {
                    let present: BTreeSet<_> =
                        adsink_db::present_dates(&self.pool, &key, window)
                            .await?
                            .into_iter()
                            .collect();
                    detect_gaps(window, &present)
                };
                chunk_gaps(
                    &gaps,
                    self.config.max_chunk_days,
                    self.config.max_rows_per_call,
                    self.config.rows_per_day_estimate,
                )
            }
        };

        let run = adsink_db::create_sync_run(
            &self.pool,
            run_id,
            &tenant.tenant_id,
            &tenant.connection_id,
            trigger_source,
            i32::try_from(opts.lookback_days).unwrap_or(i32::MAX),
            opts.force,
        )
        .await?;

        if chunks.is_empty() {
            adsink_db::finish_sync_run(&self.pool, run.id, "completed", 0, 0, 0, None).await?;
            tracing::info!(
                tenant = %tenant.tenant_id,
                run_id = %run_id,
                "no missing days in window; sync is a no-op"
            );
            return Ok(Planned::Empty(StartedRun {
                run_id,
                jobs_scheduled: 0,
                estimated_completion: Utc::now(),
            }));
        }

        let jobs = match adsink_db::create_sync_jobs(&self.pool, run.id, &chunks).await {
            Ok(jobs) => jobs,
            Err(e) => {
                fail_run_best_effort(&self.pool, run.id, &format!("{e}")).await;
                return Err(e.into());
            }
        };
        if let Err(e) =
            adsink_db::start_sync_run(&self.pool, run.id, i32::try_from(jobs.len()).unwrap_or(i32::MAX))
                .await
        {
            fail_run_best_effort(&self.pool, run.id, &format!("{e}")).await;
            return Err(e.into());
        }

        tracing::info!(
            tenant = %tenant.tenant_id,
            run_id = %run_id,
            jobs = jobs.len(),
            lookback_days = opts.lookback_days,
            force = opts.force,
            "sync run scheduled"
        );

        let started = StartedRun {
            run_id,
            jobs_scheduled: u32::try_from(jobs.len()).unwrap_or(u32::MAX),
            estimated_completion: self.estimate_completion(jobs.len()),
        };

        Ok(Planned::Work {
            started,
            ctx: Box::new(RunContext {
                pool: self.pool.clone(),
                client: Arc::clone(&self.client),
                config: self.config.clone(),
                registry: Arc::clone(&self.registry),
                cancel_rx,
                run,
                jobs,
                key,
                access_token: tenant.access_token.clone(),
            }),
        })
    }

    fn estimate_completion(&self, jobs_scheduled: usize) -> DateTime<Utc> {
        let workers = self.config.workers_per_tenant.max(1);
        let waves = jobs_scheduled.div_ceil(workers);
        let per_wave = self.config.chunk_latency_estimate + self.config.inter_job_delay;
        let total = per_wave.saturating_mul(u32::try_from(waves).unwrap_or(u32::MAX));
        let total =
            chrono::Duration::from_std(total).unwrap_or_else(|_| chrono::Duration::hours(24));
        Utc::now() + total
    }
}

struct WorkerCtx<'a> {
    pool: &'a PgPool,
    client: &'a InsightsClient,
    config: &'a EngineConfig,
    pacer: &'a TenantPacer,
    cancel: &'a watch::Receiver<bool>,
    key: &'a TenantEntityKey,
    access_token: &'a str,
    deadline: Instant,
}

struct JobOutcome {
    succeeded: bool,
    rows_written: i64,
    range: DateRange,
}

impl JobOutcome {
    fn failed(range: DateRange) -> Self {
        Self {
            succeeded: false,
            rows_written: 0,
            range,
        }
    }
}

/// Drives one planned run to its terminal state. Never returns an error:
/// every failure lands in the ledger.
async fn execute_run(ctx: RunContext) {
    let RunContext {
        pool,
        client,
        config,
        registry,
        cancel_rx,
        run,
        jobs,
        key,
        access_token,
    } = ctx;

    let deadline = Instant::now() + config.run_deadline;
    let pacer = TenantPacer::new(config.inter_job_delay);
    let jobs_total = jobs.len();

    let worker_ctx = WorkerCtx {
        pool: &pool,
        client: &client,
        config: &config,
        pacer: &pacer,
        cancel: &cancel_rx,
        key: &key,
        access_token: &access_token,
        deadline,
    };

    let outcomes: Vec<JobOutcome> = stream::iter(jobs)
        .map(|job| process_job(&worker_ctx, job))
        .buffer_unordered(config.workers_per_tenant.max(1))
        .collect()
        .await;

    let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
    let failed = jobs_total - succeeded;
    let rows_written: i64 = outcomes.iter().map(|o| o.rows_written).sum();
    let cancelled = *cancel_rx.borrow();

    // Rollups rebuild only after every job is terminal, so they never read
    // a half-written window.
    let touched = touched_span(&outcomes);
    let mut rollup_note = None;
    if let Some(touched) = touched {
        if let Err(e) = adsink_db::recompute_rollups(&pool, &key, touched).await {
            tracing::error!(
                tenant = %key.tenant_id,
                run_id = %run.public_id,
                error = %e,
                "rollup recomputation failed"
            );
            rollup_note = Some(format!("rollup recomputation failed: {e}"));
        }
    }

    let status = reduce_run_status(jobs_total, succeeded, failed, cancelled);
    let error_message = run_error_message(jobs_total, failed, cancelled, rollup_note);

    if let Err(e) = adsink_db::finish_sync_run(
        &pool,
        run.id,
        status,
        i32::try_from(succeeded).unwrap_or(i32::MAX),
        i32::try_from(failed).unwrap_or(i32::MAX),
        rows_written,
        error_message.as_deref(),
    )
    .await
    {
        tracing::error!(run_id = %run.public_id, error = %e, "failed to finalize sync run");
    }

    registry.deregister(&key.tenant_id, run.public_id);

    tracing::info!(
        tenant = %key.tenant_id,
        run_id = %run.public_id,
        status,
        jobs_succeeded = succeeded,
        jobs_failed = failed,
        rows_written,
        "sync run finished"
    );
}

async fn process_job(ctx: &WorkerCtx<'_>, job: SyncJobRow) -> JobOutcome {
    let range = DateRange::new(job.start_date, job.end_date);

    if *ctx.cancel.borrow() {
        fail_job_best_effort(ctx.pool, job.id, 0, "run cancelled").await;
        return JobOutcome::failed(range);
    }
    // Past the run deadline new jobs are no longer dispatched; whatever is
    // already in flight finishes normally.
    if Instant::now() >= ctx.deadline {
        fail_job_best_effort(ctx.pool, job.id, 0, "run deadline exceeded").await;
        return JobOutcome::failed(range);
    }

    ctx.pacer.pace().await;

    if let Err(e) = adsink_db::mark_job_running(ctx.pool, job.id).await {
        tracing::error!(job_id = job.id, error = %e, "failed to mark job running");
        return JobOutcome::failed(range);
    }

    let (result, attempts) = fetch_with_retry(&ctx.config.retry, ctx.cancel, || {
        ctx.client.fetch_insights(
            &ctx.key.connection_id,
            ctx.access_token,
            ctx.key.entity_type,
            range,
        )
    })
    .await;
    let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);

    let rows = match result {
        Ok(rows) => rows,
        Err(err) => {
            let reason = match &err {
                InsightsError::Cancelled => "run cancelled".to_string(),
                other => other.to_string(),
            };
            fail_job_best_effort(ctx.pool, job.id, attempts, &reason).await;
            return JobOutcome::failed(range);
        }
    };

    let fetched_at = Utc::now();
    let facts: Vec<NewDailyFact> = rows
        .into_iter()
        .map(|row| NewDailyFact {
            entity_id: row.entity_id,
            campaign_id: row.campaign_id,
            metric_date: row.date,
            spend: row.spend,
            impressions: row.impressions,
            clicks: row.clicks,
            conversions: row.conversions,
            source_fetched_at: fetched_at,
            raw_payload: row.raw,
        })
        .collect();

    let outcome = adsink_db::upsert_daily_facts(ctx.pool, ctx.key, &facts).await;

    if outcome.rows_written == 0 && !outcome.failed.is_empty() {
        let first = &outcome.failed[0];
        let reason = format!(
            "all {} row writes failed; first: {} {}: {}",
            outcome.failed.len(),
            first.entity_id,
            first.metric_date,
            first.reason
        );
        fail_job_best_effort(ctx.pool, job.id, attempts, &reason).await;
        return JobOutcome::failed(range);
    }

    // A partial write still completes the job: data landed, and the
    // discrepancy is recorded for the status surface.
    let note = (!outcome.failed.is_empty())
        .then(|| format!("{} of {} rows failed to write", outcome.failed.len(), facts.len()));
    let rows_i32 = i32::try_from(outcome.rows_written).unwrap_or(i32::MAX);
    if let Err(e) =
        adsink_db::complete_sync_job(ctx.pool, job.id, attempts, rows_i32, note.as_deref()).await
    {
        tracing::error!(job_id = job.id, error = %e, "failed to record job completion");
    }

    JobOutcome {
        succeeded: true,
        rows_written: i64::from(rows_i32),
        range,
    }
}

/// The overall span of dates any successful job wrote into, for rollup
/// recomputation.
fn touched_span(outcomes: &[JobOutcome]) -> Option<DateRange> {
    outcomes
        .iter()
        .filter(|o| o.rows_written > 0)
        .fold(None, |acc: Option<DateRange>, o| {
            Some(match acc {
                None => o.range,
                Some(span) => DateRange::new(
                    span.start.min(o.range.start),
                    span.end.max(o.range.end),
                ),
            })
        })
}

fn run_error_message(
    jobs_total: usize,
    failed: usize,
    cancelled: bool,
    rollup_note: Option<String>,
) -> Option<String> {
    let base = if cancelled {
        Some("run cancelled".to_string())
    } else if failed > 0 {
        Some(format!("{failed} of {jobs_total} jobs failed"))
    } else {
        None
    };

    match (base, rollup_note) {
        (Some(base), Some(note)) => Some(format!("{base}; {note}")),
        (Some(base), None) => Some(base),
        (None, note) => note,
    }
}

async fn fail_job_best_effort(pool: &PgPool, job_id: i64, attempts: i32, reason: &str) {
    if let Err(e) = adsink_db::fail_sync_job(pool, job_id, attempts, reason).await {
        tracing::error!(job_id, error = %e, "failed to record job failure");
    }
}

async fn fail_run_best_effort(pool: &PgPool, run_db_id: i64, message: &str) {
    if let Err(e) =
        adsink_db::finish_sync_run(pool, run_db_id, "error", 0, 0, 0, Some(message)).await
    {
        tracing::error!(run_db_id, error = %e, "failed to record run failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> chrono::NaiveDate {
        s.parse().expect("valid date literal")
    }

    fn outcome(succeeded: bool, rows: i64, start: &str, end: &str) -> JobOutcome {
        JobOutcome {
            succeeded,
            rows_written: rows,
            range: DateRange::new(d(start), d(end)),
        }
    }

    #[test]
    fn touched_span_covers_only_jobs_that_wrote() {
        let outcomes = vec![
            outcome(true, 10, "2026-03-01", "2026-03-05"),
            outcome(false, 0, "2026-01-01", "2026-01-31"),
            outcome(true, 5, "2026-03-10", "2026-03-12"),
        ];

        let span = touched_span(&outcomes).expect("some span");
        assert_eq!(span, DateRange::new(d("2026-03-01"), d("2026-03-12")));
    }

    #[test]
    fn touched_span_is_none_when_nothing_landed() {
        let outcomes = vec![outcome(false, 0, "2026-03-01", "2026-03-05")];
        assert!(touched_span(&outcomes).is_none());
    }

    #[test]
    fn error_message_reports_failures_and_cancellation() {
        assert_eq!(run_error_message(4, 0, false, None), None);
        assert_eq!(
            run_error_message(4, 2, false, None).as_deref(),
            Some("2 of 4 jobs failed")
        );
        assert_eq!(
            run_error_message(4, 2, true, None).as_deref(),
            Some("run cancelled")
        );
        assert_eq!(
            run_error_message(4, 0, false, Some("rollup recomputation failed: x".into()))
                .as_deref(),
            Some("rollup recomputation failed: x")
        );
        assert_eq!(
            run_error_message(4, 1, false, Some("rollup recomputation failed: x".into()))
                .as_deref(),
            Some("1 of 4 jobs failed; rollup recomputation failed: x")
        );
    }
}
