//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use domain::DomainError;
use queue::QueueError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain rule violated by the request.
    Domain(DomainError),
    /// Storage layer error.
    Store(StoreError),
    /// Message queue error.
    Queue(QueueError),
    /// Checkout pipeline error outside the checkout endpoint.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Queue(err) => queue_error_to_response(err),
            ApiError::Checkout(err) => (checkout_error_status(&err), err.to_string()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match &err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::StatusConflict { .. } | StoreError::AlreadyResolved(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        StoreError::Domain(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "storage error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn queue_error_to_response(err: QueueError) -> (StatusCode, String) {
    match &err {
        QueueError::DeadLetterNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        QueueError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// HTTP status of a checkout that did not end `ACCEPTED`.
pub fn checkout_error_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
        CheckoutError::CartStale(_) => StatusCode::CONFLICT,
        CheckoutError::EmptyCart(_) | CheckoutError::Domain(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CheckoutError::PaymentGateway(_) | CheckoutError::QueuePublish(_) => {
            StatusCode::BAD_GATEWAY
        }
        CheckoutError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CheckoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Store(err) => ApiError::Store(err),
            CheckoutError::Domain(err) => ApiError::Domain(err),
            other => ApiError::Checkout(other),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout::{CartStaleError, PaymentDeclinedError, ReconciliationId};
    use common::UserId;

    #[test]
    fn checkout_errors_map_to_caller_actionable_statuses() {
        let declined = CheckoutError::PaymentDeclined(PaymentDeclinedError {
            decline_code: "insufficient_funds".into(),
            payment_id: "pi_1".into(),
        });
        assert_eq!(checkout_error_status(&declined), StatusCode::PAYMENT_REQUIRED);

        let stale = CheckoutError::CartStale(CartStaleError { items: vec![] });
        assert_eq!(checkout_error_status(&stale), StatusCode::CONFLICT);

        let empty = CheckoutError::EmptyCart(UserId::new("u1"));
        assert_eq!(
            checkout_error_status(&empty),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let timeout = CheckoutError::Timeout {
            step: "ENQUEUEING",
        };
        assert_eq!(checkout_error_status(&timeout), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn store_not_found_is_404() {
        let response = ApiError::from(StoreError::NotFound {
            entity: "Order",
            id: "x".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn already_resolved_is_409() {
        let err = CheckoutError::Store(StoreError::AlreadyResolved(ReconciliationId::new()));
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
