use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("throttled by upstream for {scope} (retry hint: {retry_after_secs:?}s)")]
    Throttled {
        scope: String,
        retry_after_secs: Option<u64>,
    },

    #[error("upstream server error {status} at {endpoint}")]
    ServerError { status: u16, endpoint: String },

    #[error("permission denied ({status}): {reason}")]
    PermissionDenied { status: u16, reason: String },

    #[error("upstream api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed insight row for {context}: {reason}")]
    MalformedRow { context: String, reason: String },

    #[error("pagination limit reached for {entity_ref}: exceeded {max_pages} pages")]
    PaginationLimit {
        entity_ref: String,
        max_pages: usize,
    },

    #[error("fetch cancelled")]
    Cancelled,
}

/// The retry controller's view of an error: wait out a throttle hint, back
/// off and retry a transient failure, or surface a fatal error immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchClass {
    Throttled(Option<Duration>),
    Transient,
    Fatal,
}

impl InsightsError {
    #[must_use]
    pub fn class(&self) -> FetchClass {
        match self {
            InsightsError::Throttled {
                retry_after_secs, ..
            } => FetchClass::Throttled(retry_after_secs.map(Duration::from_secs)),
            // Network-level failures (timeout, connection reset) and 5xx
            // responses are ambiguous; worth another attempt.
            InsightsError::Http(_) | InsightsError::ServerError { .. } => FetchClass::Transient,
            InsightsError::PermissionDenied { .. }
            | InsightsError::Api { .. }
            | InsightsError::Deserialize { .. }
            | InsightsError::MalformedRow { .. }
            | InsightsError::PaginationLimit { .. }
            | InsightsError::Cancelled => FetchClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_carries_the_wait_hint() {
        let err = InsightsError::Throttled {
            scope: "act_1".to_string(),
            retry_after_secs: Some(30),
        };
        assert_eq!(
            err.class(),
            FetchClass::Throttled(Some(Duration::from_secs(30)))
        );

        let err = InsightsError::Throttled {
            scope: "act_1".to_string(),
            retry_after_secs: None,
        };
        assert_eq!(err.class(), FetchClass::Throttled(None));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = InsightsError::ServerError {
            status: 503,
            endpoint: "/act_1/insights".to_string(),
        };
        assert_eq!(err.class(), FetchClass::Transient);
    }

    #[test]
    fn permission_and_api_errors_are_fatal() {
        let err = InsightsError::PermissionDenied {
            status: 403,
            reason: "token expired".to_string(),
        };
        assert_eq!(err.class(), FetchClass::Fatal);

        let err = InsightsError::Api {
            code: 100,
            message: "unknown object".to_string(),
        };
        assert_eq!(err.class(), FetchClass::Fatal);
    }

    #[test]
    fn deserialize_errors_are_fatal() {
        let source = serde_json::from_str::<()>("nope").unwrap_err();
        let err = InsightsError::Deserialize {
            context: "page 1".to_string(),
            source,
        };
        assert_eq!(err.class(), FetchClass::Fatal);
    }
}
