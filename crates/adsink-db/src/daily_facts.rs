//! Time-series store adapter for the `daily_facts` table.
//!
//! The engine only ever reads recorded dates and upserts fact rows; the
//! unique index on `(tenant_id, entity_id, metric_date)` makes every write
//! idempotent. Batched writes go through a multi-row `INSERT .. ON CONFLICT`;
//! when a batch statement fails the rows are replayed one at a time so the
//! caller learns exactly which rows landed.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, QueryBuilder};

use adsink_core::{DateRange, TenantEntityKey};

use crate::DbError;

/// Rows per multi-row INSERT statement. 14 columns per row keeps the bind
/// count well under Postgres' limit at this size.
const BATCH_SIZE: usize = 100;

/// One fact row to be written, as produced from an upstream insights row.
#[derive(Debug, Clone)]
pub struct NewDailyFact {
    pub entity_id: String,
    pub campaign_id: Option<String>,
    pub metric_date: NaiveDate,
    pub spend: Decimal,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub source_fetched_at: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

impl NewDailyFact {
    /// Click-through rate in percent, `None` when there were no impressions.
    #[must_use]
    pub fn ctr(&self) -> Option<Decimal> {
        if self.impressions > 0 {
            Some(Decimal::from(self.clicks) * Decimal::from(100) / Decimal::from(self.impressions))
        } else {
            None
        }
    }

    /// Cost per click, `None` when there were no clicks.
    #[must_use]
    pub fn cpc(&self) -> Option<Decimal> {
        if self.clicks > 0 {
            Some(self.spend / Decimal::from(self.clicks))
        } else {
            None
        }
    }
}

/// A row that could not be written during a batch upsert.
#[derive(Debug, Clone)]
pub struct FailedFactWrite {
    pub entity_id: String,
    pub metric_date: NaiveDate,
    pub reason: String,
}

/// Result of a batch upsert: how many rows landed, and which did not.
#[derive(Debug, Default)]
pub struct UpsertOutcome {
    pub rows_written: u32,
    pub failed: Vec<FailedFactWrite>,
}

impl UpsertOutcome {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && self.rows_written > 0
    }
}

/// Returns the distinct dates within `window` that already have a fact row
/// for the given series, ascending.
///
/// A read failure here must surface to the caller: the gap detector treats
/// it as fatal for the whole detection pass, never as "no gaps".
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn present_dates(
    pool: &PgPool,
    key: &TenantEntityKey,
    window: DateRange,
) -> Result<Vec<NaiveDate>, DbError> {
    let dates = sqlx::query_scalar::<_, NaiveDate>(
        "SELECT DISTINCT metric_date FROM daily_facts \
         WHERE tenant_id = $1 AND connection_id = $2 AND entity_type = $3 \
           AND metric_date BETWEEN $4 AND $5 \
         ORDER BY metric_date",
    )
    .bind(&key.tenant_id)
    .bind(&key.connection_id)
    .bind(key.entity_type.to_string())
    .bind(window.start)
    .bind(window.end)
    .fetch_all(pool)
    .await?;

    Ok(dates)
}

/// Upserts a batch of fact rows for one series.
///
/// Safe to call repeatedly with identical input and concurrently for
/// disjoint date ranges of the same key; conflicts resolve last-write-wins
/// on the natural unique key. A failed batch statement falls back to
/// row-at-a-time writes so the outcome reports the exact failed subset —
/// write failures never escape as errors, they land in `failed`.
pub async fn upsert_daily_facts(
    pool: &PgPool,
    key: &TenantEntityKey,
    facts: &[NewDailyFact],
) -> UpsertOutcome {
    let mut outcome = UpsertOutcome::default();

    for chunk in facts.chunks(BATCH_SIZE) {
        match upsert_chunk(pool, key, chunk).await {
            Ok(()) => {
                outcome.rows_written += u32::try_from(chunk.len()).unwrap_or(u32::MAX);
            }
            Err(batch_err) => {
                tracing::warn!(
                    tenant = %key.tenant_id,
                    rows = chunk.len(),
                    error = %batch_err,
                    "batch fact upsert failed — replaying rows individually"
                );
                for fact in chunk {
                    match upsert_one(pool, key, fact).await {
                        Ok(()) => outcome.rows_written += 1,
                        Err(e) => outcome.failed.push(FailedFactWrite {
                            entity_id: fact.entity_id.clone(),
                            metric_date: fact.metric_date,
                            reason: e.to_string(),
                        }),
                    }
                }
            }
        }
    }

    outcome
}

async fn upsert_chunk(
    pool: &PgPool,
    key: &TenantEntityKey,
    chunk: &[NewDailyFact],
) -> Result<(), sqlx::Error> {
    let mut builder: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO daily_facts \
             (tenant_id, connection_id, entity_type, entity_id, campaign_id, \
              metric_date, spend, impressions, clicks, conversions, ctr, cpc, \
              source_fetched_at, raw_payload) ",
    );

    builder.push_values(chunk, |mut b, fact| {
        b.push_bind(&key.tenant_id)
            .push_bind(&key.connection_id)
            .push_bind(key.entity_type.to_string())
            .push_bind(&fact.entity_id)
            .push_bind(&fact.campaign_id)
            .push_bind(fact.metric_date)
            .push_bind(fact.spend)
            .push_bind(fact.impressions)
            .push_bind(fact.clicks)
            .push_bind(fact.conversions)
            .push_bind(fact.ctr())
            .push_bind(fact.cpc())
            .push_bind(fact.source_fetched_at)
            .push_bind(&fact.raw_payload);
    });

    builder.push(
        " ON CONFLICT (tenant_id, entity_id, metric_date) DO UPDATE SET \
             campaign_id       = EXCLUDED.campaign_id, \
             spend             = EXCLUDED.spend, \
             impressions       = EXCLUDED.impressions, \
             clicks            = EXCLUDED.clicks, \
             conversions       = EXCLUDED.conversions, \
             ctr               = EXCLUDED.ctr, \
             cpc               = EXCLUDED.cpc, \
             source_fetched_at = EXCLUDED.source_fetched_at, \
             raw_payload       = EXCLUDED.raw_payload, \
             updated_at        = NOW()",
    );

    builder.build().execute(pool).await?;
    Ok(())
}

async fn upsert_one(
    pool: &PgPool,
    key: &TenantEntityKey,
    fact: &NewDailyFact,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO daily_facts \
             (tenant_id, connection_id, entity_type, entity_id, campaign_id, \
              metric_date, spend, impressions, clicks, conversions, ctr, cpc, \
              source_fetched_at, raw_payload) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (tenant_id, entity_id, metric_date) DO UPDATE SET \
             campaign_id       = EXCLUDED.campaign_id, \
             spend             = EXCLUDED.spend, \
             impressions       = EXCLUDED.impressions, \
             clicks            = EXCLUDED.clicks, \
             conversions       = EXCLUDED.conversions, \
             ctr               = EXCLUDED.ctr, \
             cpc               = EXCLUDED.cpc, \
             source_fetched_at = EXCLUDED.source_fetched_at, \
             raw_payload       = EXCLUDED.raw_payload, \
             updated_at        = NOW()",
    )
    .bind(&key.tenant_id)
    .bind(&key.connection_id)
    .bind(key.entity_type.to_string())
    .bind(&fact.entity_id)
    .bind(&fact.campaign_id)
    .bind(fact.metric_date)
    .bind(fact.spend)
    .bind(fact.impressions)
    .bind(fact.clicks)
    .bind(fact.conversions)
    .bind(fact.ctr())
    .bind(fact.cpc())
    .bind(fact.source_fetched_at)
    .bind(&fact.raw_payload)
    .execute(pool)
    .await?;

    Ok(())
}
