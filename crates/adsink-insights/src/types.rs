//! Wire types for the upstream insights endpoint.
//!
//! Metric values arrive as JSON strings (`"spend": "12.34"`), occasionally as
//! bare numbers; parsing accepts both. Each parsed row keeps the raw page
//! element for audit and reprocessing.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use adsink_core::EntityType;

use crate::error::InsightsError;

/// One parsed daily metric row from the upstream API.
#[derive(Debug, Clone)]
pub struct InsightRow {
    pub entity_id: String,
    pub campaign_id: Option<String>,
    pub date: NaiveDate,
    pub spend: Decimal,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    /// The unparsed upstream element this row came from.
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InsightsEnvelope {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Paging {
    #[serde(default)]
    pub cursors: Option<Cursors>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Cursors {
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

/// Parses one page element into a typed row, keyed by the series level.
pub(crate) fn parse_row(value: &Value, level: EntityType) -> Result<InsightRow, InsightsError> {
    let id_field = match level {
        EntityType::Ad => "ad_id",
        EntityType::Campaign => "campaign_id",
        EntityType::Account => "account_id",
    };

    let entity_id = str_field(value, id_field)?;
    let date_raw = str_field(value, "date_start")?;
    let date = date_raw
        .parse::<NaiveDate>()
        .map_err(|e| malformed(value, format!("date_start '{date_raw}': {e}")))?;

    Ok(InsightRow {
        entity_id,
        campaign_id: value
            .get("campaign_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        date,
        spend: decimal_field(value, "spend")?,
        impressions: int_field(value, "impressions")?,
        clicks: int_field(value, "clicks")?,
        conversions: int_field(value, "conversions")?,
        raw: value.clone(),
    })
}

fn malformed(value: &Value, reason: String) -> InsightsError {
    let context = value
        .get("date_start")
        .and_then(Value::as_str)
        .unwrap_or("<no date>")
        .to_owned();
    InsightsError::MalformedRow { context, reason }
}

fn str_field(value: &Value, field: &str) -> Result<String, InsightsError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| malformed(value, format!("missing field '{field}'")))
}

/// Reads a metric that may be a string (`"12.34"`), a number, or absent
/// (absent counts as zero — the upstream omits all-zero metrics).
fn decimal_field(value: &Value, field: &str) -> Result<Decimal, InsightsError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(Decimal::ZERO),
        Some(Value::String(s)) => s
            .parse::<Decimal>()
            .map_err(|e| malformed(value, format!("field '{field}' = '{s}': {e}"))),
        Some(Value::Number(n)) => n
            .to_string()
            .parse::<Decimal>()
            .map_err(|e| malformed(value, format!("field '{field}' = {n}: {e}"))),
        Some(other) => Err(malformed(
            value,
            format!("field '{field}' has unexpected type: {other}"),
        )),
    }
}

fn int_field(value: &Value, field: &str) -> Result<i64, InsightsError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|e| malformed(value, format!("field '{field}' = '{s}': {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| malformed(value, format!("field '{field}' = {n}: not an integer"))),
        Some(other) => Err(malformed(
            value,
            format!("field '{field}' has unexpected type: {other}"),
        )),
    }
}
