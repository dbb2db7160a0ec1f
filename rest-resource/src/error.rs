//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Validation errors
// ============================================================================

/// Field-keyed validation messages produced by a [`Schema`](crate::schema::Schema)
///
/// Leaf values are lists of messages; batch loads nest the per-item errors
/// under the item's index.
///
/// ```rust
/// use rest_resource::error::ValidationErrors;
///
/// let mut errors = ValidationErrors::new();
/// errors.add("name", "Missing data for required field.");
/// assert!(errors.contains("name"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Map<String, Value>);

impl ValidationErrors {
    /// Create an empty error set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message for the given field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        let entry = self
            .0
            .entry(field.into())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(messages) = entry {
            messages.push(Value::String(message.into()));
        }
    }

    /// Nest another error set under a key (used for batch item indexes)
    pub fn nest(&mut self, key: impl Into<String>, errors: ValidationErrors) {
        self.0.insert(key.into(), Value::Object(errors.0));
    }

    /// Whether a field has any recorded messages
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the raw JSON map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.0.keys().map(String::as_str).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// `Unauthorized`, `NotFound`, `BadRequest`, `MethodNotAllowed` and
/// `TooManyRequests` are client errors rendered verbatim. Everything else is
/// a server fault: the detail is logged and a masked message is returned.
#[derive(Error, Debug)]
pub enum Error {
    /// The authorization hook rejected the request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed query parameters, malformed body or failed validation
    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        errors: Option<ValidationErrors>,
    },

    /// The HTTP method is not declared for the resource
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    TooManyRequests,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected storage adapter failure
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// 401 with the standard description
    pub fn unauthorized() -> Self {
        Error::Unauthorized("No permission -- see authorization schemes".to_string())
    }

    /// 404 for a path-addressed resource that has no match
    pub fn resource_not_found() -> Self {
        Error::NotFound("Resource not found".to_string())
    }

    /// 404 with the standard description
    pub fn not_found() -> Self {
        Error::NotFound("Nothing matches the given URI".to_string())
    }

    /// 400 with a plain message
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            errors: None,
        }
    }

    /// 400 carrying per-field validation messages
    pub fn invalid_data(errors: ValidationErrors) -> Self {
        Error::BadRequest {
            message: "Invalid data".to_string(),
            errors: Some(errors),
        }
    }

    /// HTTP status this error renders with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Error::Config(_) | Error::Io(_) | Error::Backend(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response body: `{"error": true, "message": ..., "errors": {...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `true`
    pub error: bool,

    /// Human readable message
    pub message: String,

    /// Per-field validation messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            errors: None,
        }
    }

    /// Create an error response carrying validation messages
    pub fn with_errors(message: impl Into<String>, errors: ValidationErrors) -> Self {
        Self {
            error: true,
            message: message.into(),
            errors: Some(errors),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Error::Unauthorized(msg) | Error::NotFound(msg) | Error::MethodNotAllowed(msg) => {
                ErrorResponse::new(msg)
            }

            Error::BadRequest { message, errors } => match errors {
                Some(errors) => ErrorResponse::with_errors(message, errors),
                None => ErrorResponse::new(message),
            },

            Error::TooManyRequests => ErrorResponse::new("Too many requests"),

            Error::Config(e) => {
                tracing::error!("Configuration error: {}", e);
                ErrorResponse::new("Internal server error")
            }

            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                ErrorResponse::new("Internal server error")
            }

            Error::Backend(e) => {
                tracing::error!(error = ?e, "Backend error: {}", e);
                ErrorResponse::new("Internal server error")
            }

            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorResponse::new("Internal server error")
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::invalid_data(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: Error) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_validation_errors_add_and_nest() {
        let mut item = ValidationErrors::new();
        item.add("name", "Missing data for required field.");
        item.add("name", "Not a valid string.");
        assert_eq!(item.as_map()["name"].as_array().unwrap().len(), 2);

        let mut batch = ValidationErrors::new();
        batch.nest("1", item);
        assert!(batch.contains("1"));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::unauthorized().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::not_found().status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::MethodNotAllowed("POST".into()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(Error::TooManyRequests.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            Error::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let (status, body) = render(Error::resource_not_found()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            serde_json::json!({"error": true, "message": "Resource not found"})
        );
    }

    #[tokio::test]
    async fn test_invalid_data_body() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "Missing data for required field.");
        let (status, body) = render(Error::invalid_data(errors)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid data");
        assert_eq!(body["errors"]["name"][0], "Missing data for required field.");
    }

    #[tokio::test]
    async fn test_backend_error_is_masked() {
        let (status, body) = render(anyhow::anyhow!("connection reset").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }
}
