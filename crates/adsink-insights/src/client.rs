//! HTTP client for the upstream insights endpoint.
//!
//! Wraps `reqwest` with outcome classification: quota exhaustion maps to
//! [`InsightsError::Throttled`] with any machine-readable wait hint the
//! response carries, 5xx to a transient error, and permission/validation
//! failures to fatal errors that are surfaced immediately.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use adsink_core::{DateRange, EntityType};

use crate::error::InsightsError;
use crate::types::{parse_row, ErrorEnvelope, InsightRow, InsightsEnvelope};

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";
const USER_AGENT: &str = "adsink/0.1 (insights-backfill)";

/// Rows requested per page.
const PAGE_LIMIT: u32 = 500;

/// Maximum number of pages to follow before returning an error.
/// Prevents infinite loops on cycling cursors.
const MAX_PAGES: usize = 200;

/// Upstream application-level error codes that mean "quota exhausted, back
/// off", as opposed to a genuinely malformed or unauthorized request.
const THROTTLE_CODES: [i64; 4] = [4, 17, 32, 613];

/// Client for the upstream insights REST endpoint.
///
/// Holds no per-tenant state; the caller passes the tenant's access token
/// per request so one client serves every tenant's pool. Use
/// [`InsightsClient::new`] for production or
/// [`InsightsClient::with_base_url`] to point at a mock server in tests.
pub struct InsightsClient {
    client: Client,
    base_url: Url,
}

impl InsightsClient {
    /// Creates a new client pointed at the production insights API.
    ///
    /// # Errors
    ///
    /// Returns [`InsightsError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64) -> Result<Self, InsightsError> {
        Self::with_base_url(timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`InsightsError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`InsightsError::Api`] if `base_url` is not
    /// a valid URL.
    pub fn with_base_url(timeout_secs: u64, base_url: &str) -> Result<Self, InsightsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| InsightsError::Api {
            code: 0,
            message: format!("invalid base URL '{base_url}': {e}"),
        })?;

        Ok(Self { client, base_url })
    }

    /// Fetches all daily insight rows for one entity reference and date
    /// range, following pagination cursors.
    ///
    /// This is exactly one chunk's upstream request from the engine's point
    /// of view; it performs no retries itself — classification is the
    /// caller's signal for that.
    ///
    /// # Errors
    ///
    /// - [`InsightsError::Throttled`] — quota exhausted; carries the parsed
    ///   wait hint when the response includes one.
    /// - [`InsightsError::ServerError`] / [`InsightsError::Http`] — transient.
    /// - [`InsightsError::PermissionDenied`] / [`InsightsError::Api`] /
    ///   [`InsightsError::Deserialize`] — fatal, surfaced immediately.
    /// - [`InsightsError::PaginationLimit`] — cursor cycle guard tripped.
    pub async fn fetch_insights(
        &self,
        entity_ref: &str,
        access_token: &str,
        level: EntityType,
        range: DateRange,
    ) -> Result<Vec<InsightRow>, InsightsError> {
        let mut rows = Vec::new();
        let mut after: Option<String> = None;

        for _page in 0..MAX_PAGES {
            let url = self.insights_url(entity_ref, access_token, level, range, after.as_deref());
            let envelope = self.request_page(entity_ref, &url).await?;

            for element in &envelope.data {
                rows.push(parse_row(element, level)?);
            }

            let next_cursor = envelope.paging.as_ref().and_then(|p| {
                p.next
                    .as_ref()
                    .and(p.cursors.as_ref())
                    .and_then(|c| c.after.clone())
            });

            match next_cursor {
                Some(cursor) if !envelope.data.is_empty() => after = Some(cursor),
                _ => return Ok(rows),
            }
        }

        Err(InsightsError::PaginationLimit {
            entity_ref: entity_ref.to_owned(),
            max_pages: MAX_PAGES,
        })
    }

    fn insights_url(
        &self,
        entity_ref: &str,
        access_token: &str,
        level: EntityType,
        range: DateRange,
        after: Option<&str>,
    ) -> Url {
        let mut url = self.base_url.clone();
        {
            // The constructor guarantees an http(s) base, which always has
            // mutable path segments.
            let mut segments = url.path_segments_mut().expect("http(s) URL has path segments");
            segments.pop_if_empty().push(entity_ref).push("insights");
        }
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("access_token", access_token)
                .append_pair("level", &level.to_string())
                .append_pair("time_increment", "1")
                .append_pair("since", &range.start.to_string())
                .append_pair("until", &range.end.to_string())
                .append_pair("limit", &PAGE_LIMIT.to_string());
            if let Some(cursor) = after {
                pairs.append_pair("after", cursor);
            }
        }
        url
    }

    async fn request_page(
        &self,
        entity_ref: &str,
        url: &Url,
    ) -> Result<InsightsEnvelope, InsightsError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        // The query string carries the access token; log the path only.
        let endpoint = url.path().to_owned();

        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let body = response.text().await?;

        if let Some(err) = classify_failure(entity_ref, &endpoint, status, retry_after_header, &body)
        {
            return Err(err);
        }

        serde_json::from_str::<InsightsEnvelope>(&body).map_err(|e| InsightsError::Deserialize {
            context: format!("insights page for {entity_ref}"),
            source: e,
        })
    }
}

/// Maps a non-success response to the engine's error taxonomy; returns
/// `None` for a 2xx response.
fn classify_failure(
    entity_ref: &str,
    endpoint: &str,
    status: StatusCode,
    retry_after_header: Option<u64>,
    body: &str,
) -> Option<InsightsError> {
    if status.is_success() {
        return None;
    }

    let api_error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error);

    let body_hint = api_error.as_ref().and_then(|e| e.retry_after_seconds);
    let is_throttle_code = api_error
        .as_ref()
        .is_some_and(|e| THROTTLE_CODES.contains(&e.code));

    if status == StatusCode::TOO_MANY_REQUESTS || is_throttle_code {
        return Some(InsightsError::Throttled {
            scope: entity_ref.to_owned(),
            retry_after_secs: retry_after_header.or(body_hint),
        });
    }

    if status.is_server_error() {
        return Some(InsightsError::ServerError {
            status: status.as_u16(),
            endpoint: endpoint.to_owned(),
        });
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let reason = api_error
            .as_ref()
            .map_or_else(|| status.to_string(), |e| e.message.clone());
        return Some(InsightsError::PermissionDenied {
            status: status.as_u16(),
            reason,
        });
    }

    match api_error {
        Some(e) => Some(InsightsError::Api {
            code: e.code,
            message: e.message,
        }),
        None => Some(InsightsError::Api {
            code: i64::from(status.as_u16()),
            message: format!("unexpected status {status} at {endpoint}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(base_url: &str) -> InsightsClient {
        InsightsClient::with_base_url(30, base_url).expect("client construction should not fail")
    }

    fn range() -> DateRange {
        DateRange::new(
            "2026-03-01".parse().expect("valid date"),
            "2026-03-10".parse().expect("valid date"),
        )
    }

    #[test]
    fn insights_url_includes_window_and_level() {
        let client = test_client("https://graph.example.com/v19.0");
        let url = client.insights_url("act_123", "tok", EntityType::Ad, range(), None);

        assert_eq!(url.path(), "/v19.0/act_123/insights");
        let query = url.query().expect("has query");
        assert!(query.contains("level=ad"));
        assert!(query.contains("since=2026-03-01"));
        assert!(query.contains("until=2026-03-10"));
        assert!(query.contains("time_increment=1"));
        assert!(!query.contains("after="));
    }

    #[test]
    fn insights_url_appends_cursor_when_present() {
        let client = test_client("https://graph.example.com/v19.0");
        let url = client.insights_url("act_123", "tok", EntityType::Ad, range(), Some("c2"));
        assert!(url.query().expect("has query").contains("after=c2"));
    }

    #[test]
    fn throttle_classification_prefers_header_hint() {
        let body = r#"{"error":{"code":17,"message":"User request limit reached","retry_after_seconds":120}}"#;
        let err = classify_failure(
            "act_1",
            "/v19.0/act_1/insights",
            StatusCode::TOO_MANY_REQUESTS,
            Some(30),
            body,
        )
        .expect("should classify");

        assert!(
            matches!(err, InsightsError::Throttled { retry_after_secs: Some(30), .. }),
            "header hint should win: {err:?}"
        );
    }

    #[test]
    fn throttle_code_in_body_is_throttled_even_without_429() {
        let body = r#"{"error":{"code":4,"message":"Application request limit reached"}}"#;
        let err = classify_failure(
            "act_1",
            "/v19.0/act_1/insights",
            StatusCode::BAD_REQUEST,
            None,
            body,
        )
        .expect("should classify");

        assert!(matches!(
            err,
            InsightsError::Throttled {
                retry_after_secs: None,
                ..
            }
        ));
    }

    #[test]
    fn non_throttle_bad_request_is_fatal_api_error() {
        let body = r#"{"error":{"code":100,"message":"Invalid parameter"}}"#;
        let err = classify_failure(
            "act_1",
            "/v19.0/act_1/insights",
            StatusCode::BAD_REQUEST,
            None,
            body,
        )
        .expect("should classify");

        assert!(matches!(err, InsightsError::Api { code: 100, .. }));
    }

    #[test]
    fn success_is_not_classified_as_failure() {
        assert!(classify_failure(
            "act_1",
            "/v19.0/act_1/insights",
            StatusCode::OK,
            None,
            "{}"
        )
        .is_none());
    }
}
