//! Error handling with RFC 7807 Problem Details for JSON responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// RFC 7807 problem body.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: String,
    status: u16,
    detail: String,
}

impl ProblemDetails {
    pub fn from_error(err: &ApiError) -> Self {
        let status = err.status_code();
        Self {
            problem_type: "about:blank",
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::warn!("API request failed: {}", self);
        let status = self.status_code();
        (status, Json(ProblemDetails::from_error(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_details_shape() {
        let err = ApiError::ServiceUnavailable("loop terminated".to_string());
        let body = serde_json::to_value(ProblemDetails::from_error(&err)).unwrap();
        assert_eq!(body["status"], 503);
        assert_eq!(body["title"], "Service Unavailable");
        assert_eq!(body["type"], "about:blank");
        assert!(body["detail"].as_str().unwrap().contains("loop terminated"));
    }
}
