//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring per-tenant backfill trigger. The cadence comes from config;
//! the engine itself decides per tenant whether there is anything to do.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use adsink_core::{AppConfig, TenantsFile};
use adsink_engine::{BackfillEngine, EngineError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process — dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    engine: BackfillEngine,
    config: Arc<AppConfig>,
    tenants: Arc<TenantsFile>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_backfill_job(&scheduler, engine, config, tenants).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Register the recurring gap-only backfill sweep over all tenants.
async fn register_backfill_job(
    scheduler: &JobScheduler,
    engine: BackfillEngine,
    config: Arc<AppConfig>,
    tenants: Arc<TenantsFile>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(config.scheduler_cron.as_str(), move |_uuid, _lock| {
        let engine = engine.clone();
        let tenants = Arc::clone(&tenants);

        Box::pin(async move {
            tracing::info!("scheduler: starting periodic backfill sweep");
            run_backfill_sweep(&engine, &tenants).await;
            tracing::info!("scheduler: periodic backfill sweep complete");
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Trigger a gap-only backfill for every configured tenant. One tenant's
/// failure never blocks the rest, and a tenant with a live run is skipped.
async fn run_backfill_sweep(engine: &BackfillEngine, tenants: &TenantsFile) {
    if tenants.tenants.is_empty() {
        tracing::info!("scheduler: no tenants configured; skipping");
        return;
    }

    for tenant in &tenants.tenants {
        let opts = engine.default_options(tenant);
        match engine.start_backfill(tenant, opts, "scheduler").await {
            Ok(started) => {
                tracing::info!(
                    tenant = %tenant.tenant_id,
                    run_id = %started.run_id,
                    jobs_scheduled = started.jobs_scheduled,
                    "scheduler: backfill triggered"
                );
            }
            Err(EngineError::RunInProgress { .. }) => {
                tracing::debug!(
                    tenant = %tenant.tenant_id,
                    "scheduler: run already in progress; skipping"
                );
            }
            Err(e) => {
                tracing::error!(
                    tenant = %tenant.tenant_id,
                    error = %e,
                    "scheduler: failed to trigger backfill"
                );
            }
        }
    }
}
