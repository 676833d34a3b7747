//! Error taxonomy for generation calls
//!
//! Providers translate every failure shape (HTTP status, API error envelope,
//! transport error, blocked prompt, unparsable body) into one of these kinds
//! before it leaves the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Request rejected as malformed, unsupported or unauthorized
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Transport failure or server-side outage
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit or quota exhausted
    #[error("Quota exceeded: {0}")]
    Quota(String),

    /// Prompt or response blocked by the provider's safety filters
    #[error("Blocked by content policy: {0}")]
    ContentPolicy(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Network,
    Quota,
    ContentPolicy,
    Unknown,
}

/// Error envelope returned by Google APIs: `{"error": {"code", "message", "status"}}`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: ApiErrorBody,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct ApiErrorBody {
    pub(crate) code: Option<u16>,
    pub(crate) message: Option<String>,
    pub(crate) status: Option<String>,
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Validation(_) => ErrorKind::Validation,
            LlmError::Network(_) => ErrorKind::Network,
            LlmError::Quota(_) => ErrorKind::Quota,
            LlmError::ContentPolicy(_) => ErrorKind::ContentPolicy,
            LlmError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LlmError::Validation(m)
            | LlmError::Network(m)
            | LlmError::Quota(m)
            | LlmError::ContentPolicy(m)
            | LlmError::Unknown(m) => m,
        }
    }

    /// Classify a non-success HTTP response from its status and body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let api_error = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error)
            .unwrap_or_default();
        Self::classify(Some(status), api_error, body)
    }

    /// Classify an error envelope that arrived inside a streamed event.
    pub(crate) fn from_api_error(api_error: ApiErrorBody) -> Self {
        Self::classify(api_error.code, api_error, "")
    }

    fn classify(status: Option<u16>, api_error: ApiErrorBody, raw_body: &str) -> Self {
        let message = api_error
            .message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(raw_body.trim().to_string()).filter(|b| !b.is_empty()))
            .unwrap_or_else(|| match status {
                Some(code) => format!("Request failed with status {}", code),
                None => "Request failed".to_string(),
            });

        match (status, api_error.status.as_deref()) {
            (_, Some("RESOURCE_EXHAUSTED")) | (Some(429), _) => LlmError::Quota(message),
            (_, Some("INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "PERMISSION_DENIED" | "UNAUTHENTICATED" | "NOT_FOUND")) => {
                LlmError::Validation(message)
            }
            (_, Some("UNAVAILABLE" | "DEADLINE_EXCEEDED" | "INTERNAL")) => LlmError::Network(message),
            (Some(400 | 401 | 403 | 404 | 413), _) => LlmError::Validation(message),
            (Some(500..=599), _) => LlmError::Network(message),
            _ => LlmError::Unknown(message),
        }
    }

    pub(crate) fn malformed(detail: impl std::fmt::Display) -> Self {
        LlmError::Unknown(format!("Malformed response: {}", detail))
    }
}

/// Finish/block reasons that mean the provider refused on safety grounds.
pub(crate) fn is_policy_reason(reason: &str) -> bool {
    matches!(
        reason,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" | "IMAGE_SAFETY"
    )
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return LlmError::from_status(status.as_u16(), &e.to_string());
        }
        if e.is_decode() {
            return LlmError::malformed(e);
        }
        LlmError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        LlmError::malformed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_from_status_and_envelope() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = LlmError::from_status(429, body);
        assert_eq!(err, LlmError::Quota("Resource has been exhausted".into()));

        // Status string wins even when the HTTP code is generic
        let body = r#"{"error":{"code":400,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(LlmError::from_status(400, body).kind(), ErrorKind::Quota);
    }

    #[test]
    fn test_validation_from_bad_request() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let err = LlmError::from_status(400, body);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.message(), "API key not valid");
    }

    #[test]
    fn test_server_errors_are_network() {
        assert_eq!(LlmError::from_status(503, "").kind(), ErrorKind::Network);
        assert_eq!(
            LlmError::from_status(503, "").message(),
            "Request failed with status 503"
        );
    }

    #[test]
    fn test_non_json_body_is_kept_as_message() {
        let err = LlmError::from_status(418, "  I'm a teapot ");
        assert_eq!(err, LlmError::Unknown("I'm a teapot".into()));
    }

    #[test]
    fn test_streamed_envelope() {
        let err = LlmError::from_api_error(ApiErrorBody {
            code: Some(500),
            message: Some("internal".into()),
            status: Some("INTERNAL".into()),
        });
        assert_eq!(err, LlmError::Network("internal".into()));
    }

    #[test]
    fn test_policy_reasons() {
        assert!(is_policy_reason("SAFETY"));
        assert!(is_policy_reason("PROHIBITED_CONTENT"));
        assert!(!is_policy_reason("STOP"));
        assert!(!is_policy_reason("MAX_TOKENS"));
    }
}
