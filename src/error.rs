//! Error types and handling for the bridge.
//!
//! This module provides comprehensive error types with rich diagnostics
//! via [`miette`] for excellent error reporting and debugging experience.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Simple detail error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailError {
    /// Error detail message.
    pub detail: String,
}

/// Simple message error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    /// Error message.
    pub message: String,
}

/// Structured error response body from a remote API.
///
/// Covers both shapes seen in the wild: Letta's `detail`/`message` bodies
/// and Matrix's `{"errcode": ..., "error": ...}` bodies (kept as
/// [`ErrorBody::Json`] so the errcode survives).
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// Plain text error response.
    Text(String),
    /// Error with detail field (validation errors, simple errors).
    Detail(DetailError),
    /// Error with message field.
    Message(MessageError),
    /// Unstructured JSON error response (fallback).
    Json(serde_json::Value),
}

impl ErrorBody {
    /// Parse an error body from a response string.
    pub fn from_response(body: &str) -> Self {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
            // Matrix errors carry errcode and must stay structured; check first.
            if json.get("errcode").is_some() {
                return Self::Json(json);
            }

            if let Ok(detail) = serde_json::from_value::<DetailError>(json.clone()) {
                return Self::Detail(detail);
            }

            if let Ok(message) = serde_json::from_value::<MessageError>(json.clone()) {
                return Self::Message(message);
            }

            Self::Json(json)
        } else {
            // Not JSON, try to extract message from HTML if possible
            let text = if body.contains("<pre>") && body.contains("</pre>") {
                if let (Some(start), Some(end)) = (body.find("<pre>"), body.find("</pre>")) {
                    body[start + 5..end].to_string()
                } else {
                    body.to_string()
                }
            } else {
                body.to_string()
            };

            Self::Text(text)
        }
    }

    /// Extract a human-readable message from the error body.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Text(text) => {
                if text.trim().is_empty() {
                    None
                } else {
                    Some(text.clone())
                }
            }
            Self::Detail(err) => Some(err.detail.clone()),
            Self::Message(err) => Some(err.message.clone()),
            Self::Json(json) => json
                .get("message")
                .or_else(|| json.get("error"))
                .or_else(|| json.get("detail"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }

    /// Extract an error code if available.
    ///
    /// For Matrix responses this is the `errcode` (e.g. `M_USER_IN_USE`);
    /// for Letta responses a `code`/`error_code`/`type` field.
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Json(json) => json
                .get("errcode")
                .or_else(|| json.get("code"))
                .or_else(|| json.get("error_code"))
                .or_else(|| json.get("type"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    }

    /// Get the raw string representation of the error body.
    pub fn as_str(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(json) => serde_json::to_string(json).unwrap_or_else(|_| json.to_string()),
            Self::Detail(err) => {
                serde_json::to_string(err).unwrap_or_else(|_| format!("{:?}", err))
            }
            Self::Message(err) => {
                serde_json::to_string(err).unwrap_or_else(|_| format!("{:?}", err))
            }
        }
    }
}

impl Serialize for ErrorBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Json(json) => json.serialize(serializer),
            Self::Detail(err) => err.serialize(serializer),
            Self::Message(err) => err.serialize(serializer),
        }
    }
}

/// Failure modes of a room join attempt.
///
/// Joins are never fatal to provisioning; each variant carries an
/// actionable note that is logged alongside the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The room id or alias is not known to the server.
    UnknownRoom,
    /// The server did not recognize the request (wrong endpoint or method).
    UnrecognizedRequest,
    /// The user is not allowed to join.
    Forbidden,
    /// The server rate-limited the join.
    RateLimited,
    /// The access token used for the join was rejected.
    UnknownToken,
    /// Any other failure.
    Other {
        /// HTTP status code of the response.
        status: u16,
        /// Error message from the server.
        message: String,
    },
}

impl JoinError {
    /// Map a Matrix error response to a join error variant.
    pub fn from_response(status: u16, errcode: Option<&str>, message: String) -> Self {
        match errcode {
            Some("M_NOT_FOUND") | Some("M_UNKNOWN_ROOM") => Self::UnknownRoom,
            Some("M_UNRECOGNIZED") => Self::UnrecognizedRequest,
            Some("M_FORBIDDEN") => Self::Forbidden,
            Some("M_LIMIT_EXCEEDED") => Self::RateLimited,
            Some("M_UNKNOWN_TOKEN") => Self::UnknownToken,
            _ => match status {
                404 => Self::UnknownRoom,
                403 => Self::Forbidden,
                429 => Self::RateLimited,
                401 => Self::UnknownToken,
                _ => Self::Other { status, message },
            },
        }
    }

    /// A short operator-facing note on how to resolve the failure.
    pub fn actionable_note(&self) -> &'static str {
        match self {
            Self::UnknownRoom => "room not found, confirm id and invites",
            Self::UnrecognizedRequest => {
                "server rejected the request shape, check homeserver version"
            }
            Self::Forbidden => "user lacks an invite or permission to join",
            Self::RateLimited => "rate limited, the next provisioning pass will retry",
            Self::UnknownToken => "access token rejected, re-login required",
            Self::Other { .. } => "unexpected join failure, see status and message",
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRoom => write!(f, "unknown room"),
            Self::UnrecognizedRequest => write!(f, "unrecognized request"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::UnknownToken => write!(f, "unknown token"),
            Self::Other { status, message } => write!(f, "join failed ({status}): {message}"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Comprehensive error type for all bridge operations.
///
/// This error type provides detailed context about failures and implements
/// [`miette::Diagnostic`] for rich error reporting with suggestions.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Authentication against the homeserver or Letta failed.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Detailed authentication error message.
        message: String,
    },

    /// The Matrix homeserver returned an error response.
    #[error("Matrix error {status}: {message}")]
    Matrix {
        /// HTTP status code.
        status: u16,
        /// Error message from the server.
        message: String,
        /// Matrix error code (e.g. `M_USER_IN_USE`) if present.
        errcode: Option<String>,
        /// Structured error response body.
        body: ErrorBody,
        /// Request URL that failed.
        url: Option<url::Url>,
        /// Request method that failed.
        method: Option<String>,
    },

    /// The Letta API returned an error response.
    #[error("Letta API error {status}: {message}")]
    LettaApi {
        /// HTTP status code.
        status: u16,
        /// Error message from the API (body truncated to 200 chars).
        message: String,
        /// Optional error code from the API.
        code: Option<String>,
        /// Structured error response body.
        body: ErrorBody,
        /// Request URL that failed.
        url: Option<url::Url>,
        /// Request method that failed.
        method: Option<String>,
    },

    /// Joining a Matrix room failed.
    #[error("Join failed: {0}")]
    Join(#[from] JoinError),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error")]
    Serde(#[from] serde_json::Error),

    /// Streaming operation failed.
    #[error("Streaming error: {message}")]
    Streaming {
        /// Detailed streaming error message.
        message: String,
        /// Source error if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Static configuration error; aborts startup.
    #[error("Configuration error: {message}")]
    Config {
        /// Configuration error message.
        message: String,
    },

    /// URL parsing error.
    #[error("Invalid URL")]
    Url(#[from] url::ParseError),

    /// I/O operation failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// URL encoding error.
    #[error("URL encoding error")]
    UrlEncoding(#[from] serde_urlencoded::ser::Error),

    /// Request timeout.
    #[error("Request timed out after {seconds} seconds")]
    RequestTimeout {
        /// Timeout duration in seconds.
        seconds: u64,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Retry after {retry_after:?} seconds")]
    RateLimit {
        /// Seconds to wait before retrying.
        retry_after: Option<u64>,
    },

    /// A Letta conversation rejected the request as busy after all retries.
    #[error("Conversation {conversation} still busy after {attempts} attempts")]
    ConversationBusy {
        /// Agent or conversation id that was busy.
        conversation: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Media ingestion failure; recorded and user-visible, never fatal.
    #[error("File upload failed: {message}")]
    FileUpload {
        /// Human-readable failure description.
        message: String,
    },

    /// An admin token could not be obtained; admin-scoped operations degrade.
    #[error("Admin token unavailable")]
    AdminTokenUnavailable,
}

impl miette::Diagnostic for BridgeError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        match self {
            Self::Http(_) => Some(Box::new("bridge::http")),
            Self::Auth { .. } => Some(Box::new("bridge::auth")),
            Self::Matrix {
                errcode: Some(errcode),
                ..
            } => Some(Box::new(format!("bridge::matrix::{errcode}"))),
            Self::Matrix { .. } => Some(Box::new("bridge::matrix")),
            Self::LettaApi {
                code: Some(code), ..
            } => Some(Box::new(format!("bridge::letta::{code}"))),
            Self::LettaApi { .. } => Some(Box::new("bridge::letta")),
            Self::Join(_) => Some(Box::new("bridge::join")),
            Self::Serde(_) => Some(Box::new("bridge::serde")),
            Self::Streaming { .. } => Some(Box::new("bridge::streaming")),
            Self::Config { .. } => Some(Box::new("bridge::config")),
            Self::Url(_) => Some(Box::new("bridge::url")),
            Self::Io(_) => Some(Box::new("bridge::io")),
            Self::UrlEncoding(_) => Some(Box::new("bridge::url_encoding")),
            Self::RequestTimeout { .. } => Some(Box::new("bridge::timeout")),
            Self::RateLimit { .. } => Some(Box::new("bridge::rate_limit")),
            Self::ConversationBusy { .. } => Some(Box::new("bridge::conversation_busy")),
            Self::FileUpload { .. } => Some(Box::new("bridge::file_upload")),
            Self::AdminTokenUnavailable => Some(Box::new("bridge::admin_token")),
        }
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        match self {
            Self::Auth { .. } => Some(Box::new(
                "Check the account credentials and that the server is reachable.",
            )),
            Self::Matrix { status: 429, .. } | Self::RateLimit { .. } => Some(Box::new(
                "You're being rate limited. Please wait before making more requests.",
            )),
            Self::Matrix { status: 403, .. } => Some(Box::new(
                "The account lacks permission for this operation on the homeserver.",
            )),
            Self::LettaApi { status: 401, .. } => Some(Box::new(
                "The Letta token is invalid or expired. Check LETTA_TOKEN.",
            )),
            Self::LettaApi {
                status: 500..=599,
                url,
                method,
                ..
            } => {
                let mut help =
                    String::from("The Letta server encountered an error. It will be retried.");
                if let (Some(u), Some(m)) = (url, method) {
                    help.push_str(&format!("\nFailed request: {} {}", m, u));
                }
                Some(Box::new(help))
            }
            Self::Join(err) => Some(Box::new(err.actionable_note())),
            Self::Config { .. } => Some(Box::new(
                "Check the environment configuration, including URLs and credentials.",
            )),
            Self::RequestTimeout { .. } => Some(Box::new(
                "The request took too long. Try increasing the timeout or check your network connection.",
            )),
            Self::ConversationBusy { .. } => Some(Box::new(
                "The agent is processing another request. Retry after the current turn finishes.",
            )),
            Self::AdminTokenUnavailable => Some(Box::new(
                "Admin-scoped operations are skipped until an admin login succeeds.",
            )),
            _ => None,
        }
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self {
            Self::Config { .. } | Self::Auth { .. } => Some(miette::Severity::Error),
            Self::Join(_) | Self::FileUpload { .. } | Self::AdminTokenUnavailable => {
                Some(miette::Severity::Warning)
            }
            Self::LettaApi {
                status: 500..=599, ..
            } => Some(miette::Severity::Error),
            _ => None,
        }
    }
}

impl BridgeError {
    /// Create a new authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new streaming error.
    pub fn streaming(message: impl Into<String>) -> Self {
        Self::Streaming {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new streaming error with source.
    pub fn streaming_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Streaming {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new file upload error.
    pub fn file_upload(message: impl Into<String>) -> Self {
        Self::FileUpload {
            message: message.into(),
        }
    }

    /// Create a new request timeout error.
    pub fn request_timeout(seconds: u64) -> Self {
        Self::RequestTimeout { seconds }
    }

    /// Create a Matrix API error from a response body.
    pub fn from_matrix_response(
        status: u16,
        body_str: String,
        url: Option<url::Url>,
        method: Option<String>,
    ) -> Self {
        let body = ErrorBody::from_response(&body_str);
        let errcode = body.code();
        let message = body
            .message()
            .unwrap_or_else(|| Self::default_message_for_status(status));

        match status {
            429 => Self::RateLimit {
                retry_after: Self::extract_retry_after_ms(&body).map(|ms| ms.div_ceil(1000)),
            },
            _ => Self::Matrix {
                status,
                message,
                errcode,
                body,
                url,
                method,
            },
        }
    }

    /// Create a Letta API error from a response body.
    ///
    /// The stored message keeps at most 200 characters of the response body.
    pub fn from_letta_response(
        status: u16,
        body_str: String,
        headers: Option<&reqwest::header::HeaderMap>,
        url: Option<url::Url>,
        method: Option<String>,
    ) -> Self {
        let body = ErrorBody::from_response(&body_str);
        let code = body.code();
        let mut message = body
            .message()
            .unwrap_or_else(|| Self::default_message_for_status(status));
        if message.len() > 200 {
            let cut = message
                .char_indices()
                .take_while(|(i, _)| *i < 200)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            message.truncate(cut);
        }

        match status {
            401 => Self::Auth { message },
            429 => {
                let retry_after = headers
                    .and_then(|h| h.get("retry-after"))
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                Self::RateLimit { retry_after }
            }
            408 | 504 => Self::RequestTimeout { seconds: 60 },
            _ => Self::LettaApi {
                status,
                message,
                code,
                body,
                url,
                method,
            },
        }
    }

    /// Get default error message for HTTP status code.
    fn default_message_for_status(status: u16) -> String {
        match status {
            400 => "Bad Request".to_string(),
            401 => "Unauthorized".to_string(),
            403 => "Forbidden".to_string(),
            404 => "Not Found".to_string(),
            408 => "Request Timeout".to_string(),
            409 => "Conflict".to_string(),
            422 => "Unprocessable Entity".to_string(),
            429 => "Too Many Requests".to_string(),
            500 => "Internal Server Error".to_string(),
            502 => "Bad Gateway".to_string(),
            503 => "Service Unavailable".to_string(),
            504 => "Gateway Timeout".to_string(),
            _ => format!("HTTP {status}"),
        }
    }

    /// Get the HTTP status code if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Matrix { status, .. } | Self::LettaApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Get the Matrix error code if this is a Matrix error.
    pub fn matrix_errcode(&self) -> Option<&str> {
        match self {
            Self::Matrix { errcode, .. } => errcode.as_deref(),
            _ => None,
        }
    }

    /// Check whether a Letta response indicates a busy conversation (409).
    pub fn is_conversation_busy(&self) -> bool {
        match self {
            Self::LettaApi { status, body, .. } => {
                *status == 409
                    || body
                        .code()
                        .is_some_and(|c| c.eq_ignore_ascii_case("CONVERSATION_BUSY"))
                    || body
                        .message()
                        .is_some_and(|m| m.contains("CONVERSATION_BUSY"))
            }
            _ => false,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. }
                | Self::RateLimit { .. }
                | Self::LettaApi {
                    status: 500 | 502 | 503,
                    ..
                }
        )
    }

    /// Retrieve the retry-after hint from a rate-limit body, in milliseconds.
    fn extract_retry_after_ms(body: &ErrorBody) -> Option<u64> {
        if let ErrorBody::Json(json) = body {
            json.get("retry_after_ms").and_then(|v| v.as_u64())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use miette::Diagnostic;

    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BridgeError::auth("Invalid token");
        assert!(matches!(err, BridgeError::Auth { .. }));
        assert_eq!(err.to_string(), "Authentication failed: Invalid token");
    }

    #[test]
    fn test_matrix_errcode_mapping() {
        let body = r#"{"errcode":"M_USER_IN_USE","error":"Desired user ID is already taken."}"#;
        let err = BridgeError::from_matrix_response(400, body.to_string(), None, None);
        assert_eq!(err.matrix_errcode(), Some("M_USER_IN_USE"));
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(
            err.to_string(),
            "Matrix error 400: Desired user ID is already taken."
        );
    }

    #[test]
    fn test_matrix_rate_limit() {
        let body =
            r#"{"errcode":"M_LIMIT_EXCEEDED","error":"Too Many Requests","retry_after_ms":2000}"#;
        let err = BridgeError::from_matrix_response(429, body.to_string(), None, None);
        match err {
            BridgeError::RateLimit { retry_after } => assert_eq!(retry_after, Some(2)),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_letta_body_truncation() {
        let long = "x".repeat(400);
        let err = BridgeError::from_letta_response(500, long, None, None, None);
        match err {
            BridgeError::LettaApi { message, .. } => assert_eq!(message.len(), 200),
            other => panic!("expected letta api error, got {other:?}"),
        }
    }

    #[test]
    fn test_conversation_busy_detection() {
        let body = r#"{"detail":"CONVERSATION_BUSY: agent is processing another request"}"#;
        let err = BridgeError::from_letta_response(409, body.to_string(), None, None, None);
        assert!(err.is_conversation_busy());

        let err = BridgeError::from_letta_response(500, "boom".to_string(), None, None, None);
        assert!(!err.is_conversation_busy());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::request_timeout(30).is_retryable());
        assert!(BridgeError::RateLimit {
            retry_after: Some(60)
        }
        .is_retryable());
        let err = BridgeError::from_letta_response(503, "down".to_string(), None, None, None);
        assert!(err.is_retryable());
        assert!(!BridgeError::auth("Invalid token").is_retryable());
        // 4xx Letta errors other than busy surface directly.
        let err = BridgeError::from_letta_response(422, "bad".to_string(), None, None, None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_join_error_mapping() {
        let err = JoinError::from_response(404, Some("M_NOT_FOUND"), "nope".into());
        assert_eq!(err, JoinError::UnknownRoom);
        assert!(err.actionable_note().contains("confirm id"));

        let err = JoinError::from_response(403, None, "denied".into());
        assert_eq!(err, JoinError::Forbidden);

        let err = JoinError::from_response(429, Some("M_LIMIT_EXCEEDED"), "slow down".into());
        assert_eq!(err, JoinError::RateLimited);

        let err = JoinError::from_response(502, None, "gateway".into());
        assert!(matches!(err, JoinError::Other { status: 502, .. }));
    }

    #[test]
    fn test_error_body_parsing() {
        let detail_json = r#"{"detail": "Not Found"}"#;
        let body = ErrorBody::from_response(detail_json);
        assert!(matches!(body, ErrorBody::Detail(_)));
        assert_eq!(body.message(), Some("Not Found".to_string()));

        let message_json = r#"{"message": "Simple error"}"#;
        let body = ErrorBody::from_response(message_json);
        assert!(matches!(body, ErrorBody::Message(_)));
        assert_eq!(body.message(), Some("Simple error".to_string()));

        let matrix_json = r#"{"errcode":"M_FORBIDDEN","error":"You are not invited"}"#;
        let body = ErrorBody::from_response(matrix_json);
        assert!(matches!(body, ErrorBody::Json(_)));
        assert_eq!(body.code(), Some("M_FORBIDDEN".to_string()));
        assert_eq!(body.message(), Some("You are not invited".to_string()));

        let body = ErrorBody::from_response("Server error");
        assert!(matches!(body, ErrorBody::Text(_)));

        let html = "<html><body><pre>Bad Request</pre></body></html>";
        let body = ErrorBody::from_response(html);
        assert_eq!(body.message(), Some("Bad Request".to_string()));
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = BridgeError::auth("test");
        assert!(err.code().is_some());

        let body = r#"{"errcode":"M_UNKNOWN_TOKEN","error":"bad token"}"#;
        let err = BridgeError::from_matrix_response(401, body.to_string(), None, None);
        assert_eq!(
            err.code().unwrap().to_string(),
            "bridge::matrix::M_UNKNOWN_TOKEN"
        );
    }

    #[test]
    fn test_default_status_messages() {
        let err = BridgeError::from_letta_response(404, "".to_string(), None, None, None);
        assert_eq!(err.to_string(), "Letta API error 404: Not Found");

        let err = BridgeError::from_letta_response(999, "".to_string(), None, None, None);
        assert_eq!(err.to_string(), "Letta API error 999: HTTP 999");
    }
}
