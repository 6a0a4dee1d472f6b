//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Order, settlement or review failure.
    Order(OrderError),
    /// Bad request from the client.
    BadRequest(String),
    /// The request carries no usable identity.
    Unauthenticated(String),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Order(err) => {
                let status = match &err {
                    OrderError::EmptyCart
                    | OrderError::InsufficientStock { .. }
                    | OrderError::InvalidReview(_) => StatusCode::BAD_REQUEST,
                    OrderError::NotFound(_) => StatusCode::NOT_FOUND,
                    OrderError::Unauthorized => StatusCode::FORBIDDEN,
                    OrderError::Contention { .. } => StatusCode::CONFLICT,
                    OrderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %err, "order operation failed");
                }
                (status, err.kind(), err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        metrics::counter!("api_errors_total", "kind" => kind).increment(1);
        let body = serde_json::json!({ "kind": kind, "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
