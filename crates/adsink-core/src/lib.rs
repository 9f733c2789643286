//! Shared configuration and domain types for the adsink backfill pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod app_config;
mod config;
mod tenants;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use tenants::{load_tenants, TenantConfig, TenantsFile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
    #[error("failed to read tenants file {path}: {source}")]
    TenantsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tenants file: {0}")]
    TenantsFileParse(#[from] serde_yaml::Error),
    #[error("tenants file validation failed: {0}")]
    Validation(String),
}

/// The level of the upstream time series a connection maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Ad,
    Campaign,
    Account,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Ad => write!(f, "ad"),
            EntityType::Campaign => write!(f, "campaign"),
            EntityType::Account => write!(f, "account"),
        }
    }
}

/// Identifies one logical daily time series to keep complete. Stable for
/// the life of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantEntityKey {
    pub tenant_id: String,
    pub connection_id: String,
    pub entity_type: EntityType,
}

/// A closed interval of calendar dates, `start <= end`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not exceed end");
        Self { start, end }
    }

    /// Number of days covered, counting both endpoints.
    #[must_use]
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// How a backfill run selects its work: how far back to look, and whether
/// days that already have facts are re-fetched anyway (data correction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOptions {
    pub lookback_days: u32,
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date literal")
    }

    #[test]
    fn date_range_len_counts_both_endpoints() {
        let range = DateRange::new(d("2026-03-01"), d("2026-03-01"));
        assert_eq!(range.len_days(), 1);

        let range = DateRange::new(d("2026-03-01"), d("2026-03-10"));
        assert_eq!(range.len_days(), 10);
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let range = DateRange::new(d("2026-03-01"), d("2026-03-10"));
        assert!(range.contains(d("2026-03-01")));
        assert!(range.contains(d("2026-03-10")));
        assert!(!range.contains(d("2026-02-28")));
        assert!(!range.contains(d("2026-03-11")));
    }

    #[test]
    fn entity_type_serializes_lowercase() {
        let json = serde_json::to_string(&EntityType::Ad).expect("serialize");
        assert_eq!(json, "\"ad\"");
        assert_eq!(EntityType::Campaign.to_string(), "campaign");
    }
}
