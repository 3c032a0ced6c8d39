use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::coordinator::CoordinatorError;

/// Wire-level error: `{error, message, details?, retry_after?, timestamp}`.
/// Every non-2xx response in the API goes through this envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    details: Option<serde_json::Value>,
    retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
            .with_details(serde_json::json!({ "field": field }))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "server_error", message)
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Validation { field, message } => Self::validation(field, message),
            CoordinatorError::Unauthorized => Self::unauthorized(err_message(&err)),
            CoordinatorError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "not_found", err_message(&err))
            }
            CoordinatorError::ProfileIncomplete => Self::new(
                StatusCode::FORBIDDEN,
                "profile_incomplete",
                err_message(&err),
            ),
            CoordinatorError::NoteArchived => {
                Self::new(StatusCode::CONFLICT, "conflict", err_message(&err))
            }
            CoordinatorError::GenerationInProgress { itinerary_id } => Self::new(
                StatusCode::CONFLICT,
                "generation_in_progress",
                err_message(&err),
            )
            .with_details(serde_json::json!({ "itinerary_id": itinerary_id })),
            CoordinatorError::CannotCancel => {
                Self::new(StatusCode::BAD_REQUEST, "cannot_cancel", err_message(&err))
            }
            CoordinatorError::ServiceLimitReached { retry_after } => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "service_limit_reached",
                err_message(&err),
            )
            .with_retry_after(retry_after),
            CoordinatorError::Incomplete => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "incomplete",
                err_message(&err),
            ),
            CoordinatorError::TooManyPoints { count, limit } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "too_many_points",
                err_message(&err),
            )
            .with_details(serde_json::json!({ "count": count, "limit": limit })),
            CoordinatorError::Internal(source) => {
                tracing::error!(error = %source, "coordinator operation failed");
                Self::internal("something went wrong, try again later")
            }
        }
    }
}

fn err_message(err: &CoordinatorError) -> String {
    err.to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.kind,
            "message": self.message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        if let Some(retry_after) = self.retry_after {
            body["retry_after"] = retry_after.into();
        }
        (self.status, Json(body)).into_response()
    }
}
