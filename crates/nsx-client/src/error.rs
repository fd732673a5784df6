//! NSX client errors
//!
//! Every error can be classified into a retryable or terminal failure via
//! [`NsxError::classify`].

use serde::Deserialize;
use thiserror::Error;

/// NSX error codes that indicate a transient condition on the manager side
/// (object locked, concurrent modification, realization backlog, service
/// restarting). Requests failing with one of these codes may be retried.
pub const TRANSIENT_ERROR_CODES: &[i64] = &[98, 99, 500_012, 500_040, 500_045, 503_040, 604];

/// Errors that can occur when interacting with the NSX API
#[derive(Debug, Error)]
pub enum NsxError {
    /// HTTP transport error (connect, timeout, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// NSX returned a non-success status
    #[error("NSX API error: {0}")]
    Api(ApiError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad credentials, expired session)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g. missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Malformed NSX policy path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Connection-level failure that did not come from reqwest
    #[error("Connection error: {0}")]
    Connection(String),
}

/// A non-success API response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status_code: u16,
    pub error_code: Option<i64>,
    pub detail: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error_code {
            Some(code) => write!(f, "{} (error_code {}): {}", self.status_code, code, self.detail),
            None => write!(f, "{}: {}", self.status_code, self.detail),
        }
    }
}

/// Body NSX returns alongside error statuses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_code: Option<i64>,
    error_message: Option<String>,
}

impl ApiError {
    /// Build an API error from a status and raw response body
    pub fn from_response(status_code: u16, context: &str, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .error_message
            .unwrap_or_else(|| body.chars().take(500).collect());
        Self {
            status_code,
            error_code: parsed.error_code,
            detail: format!("{context} - {message}"),
        }
    }
}

/// Retry classification of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClass {
    pub retryable: bool,
    pub status_code: Option<u16>,
    pub detail: String,
}

impl NsxError {
    /// Classify the error for retry decisions
    pub fn classify(&self) -> ErrorClass {
        let detail = self.to_string();
        match self {
            NsxError::Http(e) => ErrorClass {
                retryable: e.is_connect() || e.is_timeout(),
                status_code: e.status().map(|s| s.as_u16()),
                detail,
            },
            NsxError::Connection(_) => ErrorClass {
                retryable: true,
                status_code: None,
                detail,
            },
            NsxError::Api(api) => {
                let transient_code = api
                    .error_code
                    .is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code));
                ErrorClass {
                    retryable: api.status_code >= 500 || api.status_code == 429 || transient_code,
                    status_code: Some(api.status_code),
                    detail,
                }
            }
            NsxError::NotFound(_) => ErrorClass {
                retryable: false,
                status_code: Some(404),
                detail,
            },
            NsxError::Authentication(_) => ErrorClass {
                retryable: false,
                status_code: Some(403),
                detail,
            },
            NsxError::Serialization(_) | NsxError::InvalidRequest(_) | NsxError::InvalidPath(_) => {
                ErrorClass {
                    retryable: false,
                    status_code: None,
                    detail,
                }
            }
        }
    }

    /// Whether the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        self.classify().retryable
    }

    /// Whether the error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, NsxError::NotFound(_))
            || matches!(self, NsxError::Api(api) if api.status_code == 404)
    }

    /// Shorthand for a server-side failure with the given status
    pub fn api(status_code: u16, detail: impl Into<String>) -> Self {
        NsxError::Api(ApiError {
            status_code,
            error_code: None,
            detail: detail.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(NsxError::api(503, "busy").is_retryable());
        assert!(NsxError::api(500, "boom").is_retryable());
        assert!(NsxError::api(429, "slow down").is_retryable());
    }

    #[test]
    fn test_client_errors_are_terminal() {
        let err = NsxError::api(400, "bad field");
        let class = err.classify();
        assert!(!class.retryable);
        assert_eq!(class.status_code, Some(400));
        assert!(!NsxError::NotFound("vpc".to_string()).is_retryable());
        assert!(!NsxError::InvalidPath("/bad".to_string()).is_retryable());
    }

    #[test]
    fn test_transient_error_code_on_4xx_is_retryable() {
        let err = NsxError::Api(ApiError {
            status_code: 400,
            error_code: Some(98),
            detail: "object locked".to_string(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_connection_error_is_retryable() {
        assert!(NsxError::Connection("reset by peer".to_string()).is_retryable());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(NsxError::NotFound("x".to_string()).is_not_found());
        assert!(NsxError::api(404, "gone").is_not_found());
        assert!(!NsxError::api(500, "gone").is_not_found());
    }

    #[test]
    fn test_api_error_from_nsx_body() {
        let body = r#"{"httpStatus":"BAD_REQUEST","error_code":500012,"error_message":"Object is being realized"}"#;
        let err = ApiError::from_response(400, "PATCH /orgs/default", body);
        assert_eq!(err.error_code, Some(500_012));
        assert_eq!(err.detail, "PATCH /orgs/default - Object is being realized");
    }

    #[test]
    fn test_api_error_from_plain_body() {
        let err = ApiError::from_response(502, "GET /x", "gateway down");
        assert_eq!(err.error_code, None);
        assert!(err.detail.ends_with("gateway down"));
    }
}
