//! Gap-detection-and-backfill engine.
//!
//! Keeps each tenant's daily fact store complete over a rolling window:
//! detects missing-day gaps, splits them into upstream-safe chunks, works the
//! chunks through a bounded per-tenant worker pool with retry/backoff, and
//! rebuilds rollups once every job of a run is terminal.

use thiserror::Error;

pub mod chunk;
pub mod gaps;
pub mod pacer;
pub mod registry;
pub mod run;
pub mod status;

pub use registry::RunRegistry;
pub use run::{BackfillEngine, CancelAck, EngineConfig, StartedRun};
pub use status::{JobDetail, OverallStatus, SyncStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a sync run is already in progress for tenant {tenant_id}")]
    RunInProgress { tenant_id: String },
    #[error("sync run not found")]
    RunNotFound,
    #[error(transparent)]
    Db(#[from] adsink_db::DbError),
}
