use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub tenants_path: PathBuf,

    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,

    pub insights_base_url: String,
    pub insights_request_timeout_secs: u64,

    /// Default lookback window for runs that do not specify one.
    pub lookback_days_default: u32,
    /// Hours after midnight UTC before the previous day counts as expected;
    /// upstream platforms finalize a day's metrics late.
    pub finality_grace_hours: u32,
    pub max_chunk_days: u32,
    pub max_rows_per_call: u32,
    /// Expected fact rows per covered day, used to bound chunk spans.
    pub rows_per_day_estimate: u32,

    pub workers_per_tenant: usize,
    pub inter_job_delay_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub throttle_wait_min_secs: u64,
    pub throttle_wait_max_secs: u64,
    pub run_deadline_secs: u64,
    /// Rough wall-clock cost of one chunk fetch+write, for completion estimates.
    pub chunk_latency_estimate_secs: u64,

    /// Six-field cron expression driving the periodic per-tenant backfill.
    pub scheduler_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("tenants_path", &self.tenants_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("insights_base_url", &self.insights_base_url)
            .field(
                "insights_request_timeout_secs",
                &self.insights_request_timeout_secs,
            )
            .field("lookback_days_default", &self.lookback_days_default)
            .field("finality_grace_hours", &self.finality_grace_hours)
            .field("max_chunk_days", &self.max_chunk_days)
            .field("max_rows_per_call", &self.max_rows_per_call)
            .field("rows_per_day_estimate", &self.rows_per_day_estimate)
            .field("workers_per_tenant", &self.workers_per_tenant)
            .field("inter_job_delay_ms", &self.inter_job_delay_ms)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("throttle_wait_min_secs", &self.throttle_wait_min_secs)
            .field("throttle_wait_max_secs", &self.throttle_wait_max_secs)
            .field("run_deadline_secs", &self.run_deadline_secs)
            .field(
                "chunk_latency_estimate_secs",
                &self.chunk_latency_estimate_secs,
            )
            .field("scheduler_cron", &self.scheduler_cron)
            .finish()
    }
}
