//! Rollup recomputation for the `aggregate_facts` table.
//!
//! Aggregates are always rebuilt from the raw facts for every grouping key a
//! run touched. Upstream platforms revise already-reported days, so patching
//! a stored aggregate incrementally would accumulate drift; delete-and-rebuild
//! inside one transaction keeps readers consistent.

use chrono::{Datelike, NaiveDate};
use sqlx::PgPool;

use adsink_core::{DateRange, TenantEntityKey};

use crate::DbError;

/// Rebuilds entity-month, campaign-month, and account-month rollups for the
/// months overlapping `touched`.
///
/// Returns the number of aggregate rows written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement in the transaction fails.
pub async fn recompute_rollups(
    pool: &PgPool,
    key: &TenantEntityKey,
    touched: DateRange,
) -> Result<u64, DbError> {
    let window = month_window(touched);

    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM aggregate_facts \
         WHERE tenant_id = $1 AND period BETWEEN $2 AND $3",
    )
    .bind(&key.tenant_id)
    .bind(window.start)
    .bind(window.end)
    .execute(&mut *tx)
    .await?;

    let mut rows_written: u64 = 0;

    // entity_month: one rollup per entity per calendar month.
    rows_written += sqlx::query(
        "INSERT INTO aggregate_facts \
             (tenant_id, grain, group_id, period, spend, impressions, clicks, conversions, ctr, cpc) \
         SELECT tenant_id, 'entity_month', entity_id, \
                date_trunc('month', metric_date)::date, \
                SUM(spend), SUM(impressions), SUM(clicks), SUM(conversions), \
                CASE WHEN SUM(impressions) > 0 \
                     THEN SUM(clicks)::numeric * 100 / SUM(impressions) END, \
                CASE WHEN SUM(clicks) > 0 THEN SUM(spend) / SUM(clicks) END \
         FROM daily_facts \
         WHERE tenant_id = $1 AND connection_id = $2 \
           AND metric_date BETWEEN $3 AND $4 \
         GROUP BY tenant_id, entity_id, date_trunc('month', metric_date)",
    )
    .bind(&key.tenant_id)
    .bind(&key.connection_id)
    .bind(window.start)
    .bind(window.end)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    // campaign_month: facts without a campaign dimension are left out.
    rows_written += sqlx::query(
        "INSERT INTO aggregate_facts \
             (tenant_id, grain, group_id, period, spend, impressions, clicks, conversions, ctr, cpc) \
         SELECT tenant_id, 'campaign_month', campaign_id, \
                date_trunc('month', metric_date)::date, \
                SUM(spend), SUM(impressions), SUM(clicks), SUM(conversions), \
                CASE WHEN SUM(impressions) > 0 \
                     THEN SUM(clicks)::numeric * 100 / SUM(impressions) END, \
                CASE WHEN SUM(clicks) > 0 THEN SUM(spend) / SUM(clicks) END \
         FROM daily_facts \
         WHERE tenant_id = $1 AND connection_id = $2 AND campaign_id IS NOT NULL \
           AND metric_date BETWEEN $3 AND $4 \
         GROUP BY tenant_id, campaign_id, date_trunc('month', metric_date)",
    )
    .bind(&key.tenant_id)
    .bind(&key.connection_id)
    .bind(window.start)
    .bind(window.end)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    // account_month: whole-connection totals.
    rows_written += sqlx::query(
        "INSERT INTO aggregate_facts \
             (tenant_id, grain, group_id, period, spend, impressions, clicks, conversions, ctr, cpc) \
         SELECT tenant_id, 'account_month', connection_id, \
                date_trunc('month', metric_date)::date, \
                SUM(spend), SUM(impressions), SUM(clicks), SUM(conversions), \
                CASE WHEN SUM(impressions) > 0 \
                     THEN SUM(clicks)::numeric * 100 / SUM(impressions) END, \
                CASE WHEN SUM(clicks) > 0 THEN SUM(spend) / SUM(clicks) END \
         FROM daily_facts \
         WHERE tenant_id = $1 AND connection_id = $2 \
           AND metric_date BETWEEN $3 AND $4 \
         GROUP BY tenant_id, connection_id, date_trunc('month', metric_date)",
    )
    .bind(&key.tenant_id)
    .bind(&key.connection_id)
    .bind(window.start)
    .bind(window.end)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    Ok(rows_written)
}

/// Expands a touched date span to whole calendar months so each affected
/// month is rebuilt from its complete fact set.
fn month_window(touched: DateRange) -> DateRange {
    let start = touched
        .start
        .with_day(1)
        .unwrap_or(touched.start);
    let end = last_day_of_month(touched.end);
    DateRange::new(start, end)
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date literal")
    }

    #[test]
    fn month_window_expands_to_whole_months() {
        let window = month_window(DateRange::new(d("2026-01-15"), d("2026-03-02")));
        assert_eq!(window.start, d("2026-01-01"));
        assert_eq!(window.end, d("2026-03-31"));
    }

    #[test]
    fn month_window_handles_december() {
        let window = month_window(DateRange::new(d("2025-12-05"), d("2025-12-20")));
        assert_eq!(window.start, d("2025-12-01"));
        assert_eq!(window.end, d("2025-12-31"));
    }

    #[test]
    fn last_day_of_february_respects_leap_years() {
        assert_eq!(last_day_of_month(d("2024-02-10")), d("2024-02-29"));
        assert_eq!(last_day_of_month(d("2026-02-10")), d("2026-02-28"));
    }
}
