//! Foreground backfill: plan, drive the worker pool to completion, and
//! print the terminal summary.

use adsink_engine::{BackfillEngine, EngineConfig, OverallStatus};
use adsink_insights::InsightsClient;

pub(crate) async fn run(tenant_id: &str, lookback: Option<u32>, force: bool) -> anyhow::Result<()> {
    let config = adsink_core::load_app_config()?;
    let tenants = adsink_core::load_tenants(&config.tenants_path)?;
    let tenant = tenants.find(tenant_id).ok_or_else(|| {
        anyhow::anyhow!(
            "tenant '{tenant_id}' not found in {}",
            config.tenants_path.display()
        )
    })?;

    let pool = adsink_db::connect_pool(
        &config.database_url,
        adsink_db::PoolConfig::from_app_config(&config),
    )
    .await?;
    adsink_db::run_migrations(&pool).await?;

    let client = InsightsClient::with_base_url(
        config.insights_request_timeout_secs,
        &config.insights_base_url,
    )?;
    let engine = BackfillEngine::new(pool, client, EngineConfig::from_app_config(&config));

    let mut opts = engine.default_options(tenant);
    if let Some(days) = lookback {
        anyhow::ensure!(days > 0, "--lookback must be at least 1");
        opts.lookback_days = days;
    }
    opts.force = force;

    tracing::info!(
        tenant = %tenant.tenant_id,
        lookback_days = opts.lookback_days,
        force = opts.force,
        "starting foreground backfill"
    );

    let status = engine.run_backfill(tenant, opts, "cli").await?;

    println!(
        "run {}: {} ({} of {} jobs completed, {} failed, {} rows written)",
        status.run_id,
        status.overall_status,
        status.jobs_completed,
        status.jobs_total,
        status.jobs_failed,
        status.rows_written
    );
    for job in &status.jobs {
        if let Some(err) = &job.last_error {
            println!(
                "  {}..{} [{}] {err}",
                job.start_date, job.end_date, job.status
            );
        }
    }

    if status.overall_status == OverallStatus::Error {
        anyhow::bail!("all {} jobs failed", status.jobs_total);
    }
    Ok(())
}
