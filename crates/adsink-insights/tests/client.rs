//! Integration tests for `InsightsClient` using wiremock HTTP mocks.

use adsink_core::{DateRange, EntityType};
use adsink_insights::{FetchClass, InsightsClient, InsightsError};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(base_url: &str) -> InsightsClient {
    InsightsClient::with_base_url(30, base_url).expect("client construction should not fail")
}

fn range() -> DateRange {
    DateRange::new(
        "2026-03-01".parse().expect("valid date"),
        "2026-03-05".parse().expect("valid date"),
    )
}

#[tokio::test]
async fn fetch_insights_returns_parsed_rows() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "data": [
            {
                "ad_id": "120210001",
                "campaign_id": "238000001",
                "date_start": "2026-03-01",
                "date_stop": "2026-03-01",
                "spend": "12.34",
                "impressions": "1523",
                "clicks": "47",
                "conversions": "3"
            },
            {
                "ad_id": "120210001",
                "campaign_id": "238000001",
                "date_start": "2026-03-02",
                "date_stop": "2026-03-02",
                "spend": "8.00",
                "impressions": "900",
                "clicks": "12"
            }
        ]
    });

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("access_token", "test-token"))
        .and(query_param("level", "ad"))
        .and(query_param("since", "2026-03-01"))
        .and(query_param("until", "2026-03-05"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let rows = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect("should parse rows");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity_id, "120210001");
    assert_eq!(rows[0].clicks, 47);
    assert_eq!(rows[0].conversions, 3);
    assert_eq!(rows[1].date, "2026-03-02".parse().unwrap());
    assert_eq!(rows[1].conversions, 0, "absent metric defaults to zero");
}

#[tokio::test]
async fn fetch_insights_follows_pagination_cursors() {
    let server = MockServer::start().await;

    let page_one = serde_json::json!({
        "data": [
            { "ad_id": "a1", "date_start": "2026-03-01", "spend": "1.00" }
        ],
        "paging": {
            "cursors": { "before": "c0", "after": "c2" },
            "next": format!("{}/act_123/insights?after=c2", server.uri())
        }
    });
    let page_two = serde_json::json!({
        "data": [
            { "ad_id": "a2", "date_start": "2026-03-02", "spend": "2.00" }
        ]
    });

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("after", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&page_two))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&page_one))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let rows = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect("should follow cursor");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity_id, "a1");
    assert_eq!(rows[1].entity_id, "a2");
}

#[tokio::test]
async fn http_429_maps_to_throttled_with_header_hint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "30")
                .set_body_json(serde_json::json!({
                    "error": { "code": 17, "message": "User request limit reached" }
                })),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect_err("should be throttled");

    assert!(
        matches!(
            err,
            InsightsError::Throttled {
                retry_after_secs: Some(30),
                ..
            }
        ),
        "got {err:?}"
    );
}

#[tokio::test]
async fn quota_error_body_maps_to_throttled_with_body_hint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "code": 4,
                "message": "Application request limit reached",
                "retry_after_seconds": 120
            }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect_err("should be throttled");

    match err {
        InsightsError::Throttled {
            retry_after_secs, ..
        } => assert_eq!(retry_after_secs, Some(120)),
        other => panic!("expected Throttled, got {other:?}"),
    }
}

#[tokio::test]
async fn http_500_is_a_transient_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect_err("should be a server error");

    assert!(matches!(err, InsightsError::ServerError { status: 503, .. }));
    assert_eq!(err.class(), FetchClass::Transient);
}

#[tokio::test]
async fn http_401_is_a_fatal_permission_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "code": 190, "message": "Invalid OAuth access token" }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect_err("should be permission denied");

    match &err {
        InsightsError::PermissionDenied { status, reason } => {
            assert_eq!(*status, 401);
            assert!(reason.contains("Invalid OAuth access token"));
        }
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
    assert_eq!(err.class(), FetchClass::Fatal);
}

#[tokio::test]
async fn malformed_success_body_is_a_fatal_deserialize_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>definitely not json</html>"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .fetch_insights("act_123", "test-token", EntityType::Ad, range())
        .await
        .expect_err("should fail to deserialize");

    assert!(matches!(err, InsightsError::Deserialize { .. }));
    assert_eq!(err.class(), FetchClass::Fatal);
}
