use std::time::Duration;

use fredgate::{FredError, Result};

#[test]
fn test_error_display() {
    let err = FredError::Api {
        status: 400,
        code: Some(400),
        message: "Bad Request. Variable series_id is not set.".into(),
    };
    assert!(err.to_string().contains("400"));
    assert!(err.to_string().contains("series_id"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(FredError::InvalidInput("empty endpoint".into()))
    }
    assert!(returns_error().is_err());
}

#[test]
fn json_errors_convert() {
    fn parse() -> Result<serde_json::Value> {
        Ok(serde_json::from_str("{not json")?)
    }
    let err = parse().expect_err("invalid json");
    assert!(matches!(err, FredError::Json(_)));
    assert_eq!(err.kind(), "json");
}

// ============================================================================
// Transient error classification
// ============================================================================

#[test]
fn transient_errors() {
    assert!(FredError::RateLimited { retry_after: None }.is_transient());
    assert!(
        FredError::RateLimited {
            retry_after: Some(Duration::from_secs(1))
        }
        .is_transient()
    );
    assert!(FredError::Http("connection reset".into()).is_transient());
    assert!(FredError::Timeout.is_transient());
    assert!(
        FredError::Server {
            status: 502,
            message: "bad gateway".into()
        }
        .is_transient()
    );
}

#[test]
fn permanent_errors() {
    assert!(
        !FredError::Api {
            status: 400,
            code: Some(400),
            message: "bad request".into()
        }
        .is_transient()
    );
    assert!(
        !FredError::Api {
            status: 200,
            code: Some(404),
            message: "embedded".into()
        }
        .is_transient()
    );
    assert!(!FredError::InvalidPayload("html".into()).is_transient());
    assert!(!FredError::InvalidInput("x".into()).is_transient());
    assert!(!FredError::Cache("down".into()).is_transient());
    assert!(!FredError::Configuration("bad".into()).is_transient());
}

// ============================================================================
// Accessors
// ============================================================================

#[test]
fn retry_after_only_for_rate_limits() {
    let limited = FredError::RateLimited {
        retry_after: Some(Duration::from_secs(4)),
    };
    assert_eq!(limited.retry_after(), Some(Duration::from_secs(4)));
    assert_eq!(FredError::Timeout.retry_after(), None);
}

#[test]
fn status_codes() {
    assert_eq!(
        FredError::RateLimited { retry_after: None }.status(),
        Some(429)
    );
    assert_eq!(
        FredError::Server {
            status: 503,
            message: String::new()
        }
        .status(),
        Some(503)
    );
    assert_eq!(FredError::Http("reset".into()).status(), None);
}

#[test]
fn kinds_are_stable_labels() {
    assert_eq!(FredError::Timeout.kind(), "timeout");
    assert_eq!(FredError::Http(String::new()).kind(), "http");
    assert_eq!(
        FredError::RateLimited { retry_after: None }.kind(),
        "rate_limited"
    );
    assert_eq!(
        FredError::Server {
            status: 500,
            message: String::new()
        }
        .kind(),
        "server"
    );
    assert_eq!(
        FredError::Api {
            status: 400,
            code: None,
            message: String::new()
        }
        .kind(),
        "api"
    );
}
