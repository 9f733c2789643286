mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use adsink_engine::{BackfillEngine, EngineConfig};
use adsink_insights::InsightsClient;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(adsink_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let tenants = Arc::new(adsink_core::load_tenants(&config.tenants_path)?);
    tracing::info!(tenants = tenants.tenants.len(), "loaded tenant connections");

    let pool_config = adsink_db::PoolConfig::from_app_config(&config);
    let pool = adsink_db::connect_pool(&config.database_url, pool_config).await?;
    adsink_db::run_migrations(&pool).await?;

    let client = InsightsClient::with_base_url(
        config.insights_request_timeout_secs,
        &config.insights_base_url,
    )?;
    let engine = BackfillEngine::new(pool.clone(), client, EngineConfig::from_app_config(&config));

    let _scheduler = scheduler::build_scheduler(
        engine.clone(),
        Arc::clone(&config),
        Arc::clone(&tenants),
    )
    .await?;

    let auth = AuthState::from_env(matches!(config.env, adsink_core::Environment::Development))?;
    let app = build_app(
        AppState {
            pool,
            engine: engine.clone(),
            tenants,
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Live runs observe the cancellation signal at their next suspension
    // point; already-written facts stay valid.
    engine.cancel_all();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
