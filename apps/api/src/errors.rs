use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    QuotaExceeded { retry_after: u64 },

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller may usefully repeat the same request.
    pub fn retryable(&self) -> bool {
        match self {
            AppError::Provider { retryable, .. } => *retryable,
            AppError::Internal(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.retryable();
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::QuotaExceeded { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                format!("Too many review requests. Try again in {retry_after} seconds."),
            ),
            AppError::Provider { message, .. } => {
                tracing::error!("Provider error: {message}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "PROVIDER_ERROR",
                    "The review could not be generated. Please try again later.".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access denied".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message,
            "retryable": retryable,
        });
        if let AppError::QuotaExceeded { retry_after } = &self {
            error["retry_after"] = json!(retry_after);
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let AppError::QuotaExceeded { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_is_400_and_not_retryable() {
        let response = AppError::Validation("resume is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "resume is required");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_quota_exceeded_carries_retry_after() {
        let response = AppError::QuotaExceeded { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        let body = body_json(response).await;
        assert_eq!(body["error"]["retry_after"], 42);
    }

    #[tokio::test]
    async fn test_provider_error_hides_detail() {
        let response = AppError::Provider {
            message: "gemini: 503 upstream overloaded".into(),
            retryable: true,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["retryable"], true);
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("overloaded"));
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_and_hides_detail() {
        let error: AppError = anyhow::anyhow!("connection refused: db.internal:5432").into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["retryable"], true);
        assert!(!body["error"]["message"].as_str().unwrap().contains("5432"));
    }
}
