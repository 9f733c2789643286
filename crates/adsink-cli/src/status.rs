//! Run inspection commands: one run as JSON, or a tenant's recent history.

use uuid::Uuid;

pub(crate) async fn show_run(run_id: Uuid) -> anyhow::Result<()> {
    let pool = connect().await?;
    let status = adsink_engine::status::status_for_run(&pool, run_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub(crate) async fn list_runs(tenant_id: &str, limit: i64) -> anyhow::Result<()> {
    let pool = connect().await?;
    let runs = adsink_db::list_runs_for_tenant(&pool, tenant_id, limit.clamp(1, 200)).await?;

    if runs.is_empty() {
        println!("no runs recorded for tenant '{tenant_id}'");
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {:<9}  {:>4} jobs ({} failed)  {:>8} rows  {}  {}",
            run.public_id,
            run.status,
            run.jobs_total,
            run.jobs_failed,
            run.rows_written,
            run.created_at.format("%Y-%m-%d %H:%M"),
            run.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

async fn connect() -> anyhow::Result<sqlx::PgPool> {
    let config = adsink_core::load_app_config()?;
    let pool = adsink_db::connect_pool(
        &config.database_url,
        adsink_db::PoolConfig::from_app_config(&config),
    )
    .await?;
    Ok(pool)
}
