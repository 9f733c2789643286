use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files — useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual environment
/// so it can be tested with a pure `HashMap` lookup — no `set_var`/`remove_var` needed.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("ADSINK_ENV", "development"));

    let bind_addr = parse_addr("ADSINK_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("ADSINK_LOG_LEVEL", "info");
    let tenants_path = PathBuf::from(or_default("ADSINK_TENANTS_PATH", "./config/tenants.yaml"));

    let db_max_connections = parse_u32("ADSINK_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("ADSINK_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("ADSINK_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let insights_base_url = or_default(
        "ADSINK_INSIGHTS_BASE_URL",
        "https://graph.facebook.com/v19.0",
    );
    let insights_request_timeout_secs = parse_u64("ADSINK_INSIGHTS_REQUEST_TIMEOUT_SECS", "30")?;

    let lookback_days_default = parse_u32("ADSINK_LOOKBACK_DAYS_DEFAULT", "90")?;
    let finality_grace_hours = parse_u32("ADSINK_FINALITY_GRACE_HOURS", "6")?;
    let max_chunk_days = parse_u32("ADSINK_MAX_CHUNK_DAYS", "30")?;
    let max_rows_per_call = parse_u32("ADSINK_MAX_ROWS_PER_CALL", "5000")?;
    let rows_per_day_estimate = parse_u32("ADSINK_ROWS_PER_DAY_ESTIMATE", "50")?;

    let workers_per_tenant = parse_usize("ADSINK_WORKERS_PER_TENANT", "3")?;
    let inter_job_delay_ms = parse_u64("ADSINK_INTER_JOB_DELAY_MS", "500")?;
    let max_attempts = parse_u32("ADSINK_MAX_ATTEMPTS", "3")?;
    let backoff_base_ms = parse_u64("ADSINK_BACKOFF_BASE_MS", "2000")?;
    let throttle_wait_min_secs = parse_u64("ADSINK_THROTTLE_WAIT_MIN_SECS", "1")?;
    let throttle_wait_max_secs = parse_u64("ADSINK_THROTTLE_WAIT_MAX_SECS", "900")?;
    let run_deadline_secs = parse_u64("ADSINK_RUN_DEADLINE_SECS", "1800")?;
    let chunk_latency_estimate_secs = parse_u64("ADSINK_CHUNK_LATENCY_ESTIMATE_SECS", "5")?;

    let scheduler_cron = or_default("ADSINK_SCHEDULER_CRON", "0 15 * * * *");

    if max_attempts == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "ADSINK_MAX_ATTEMPTS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    if throttle_wait_min_secs > throttle_wait_max_secs {
        return Err(ConfigError::InvalidEnvVar {
            var: "ADSINK_THROTTLE_WAIT_MIN_SECS".to_string(),
            reason: "must not exceed ADSINK_THROTTLE_WAIT_MAX_SECS".to_string(),
        });
    }

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        tenants_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        insights_base_url,
        insights_request_timeout_secs,
        lookback_days_default,
        finality_grace_hours,
        max_chunk_days,
        max_rows_per_call,
        rows_per_day_estimate,
        workers_per_tenant,
        inter_job_delay_ms,
        max_attempts,
        backoff_base_ms,
        throttle_wait_min_secs,
        throttle_wait_max_secs,
        run_deadline_secs,
        chunk_latency_estimate_secs,
        scheduler_cron,
    })
}

fn parse_environment(raw: &str) -> Environment {
    match raw.to_ascii_lowercase().as_str() {
        "production" | "prod" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}
