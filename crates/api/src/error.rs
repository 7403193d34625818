//! API error type and HTTP status mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use daybook_billing::BillingError;
use serde_json::json;

/// Error returned from API handlers. Wraps billing errors and maps each
/// category to a status code; internal detail never reaches the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Billing(e) => match e {
                BillingError::Unauthenticated => (StatusCode::UNAUTHORIZED, e.to_string()),
                BillingError::PermissionDenied(_) => (StatusCode::FORBIDDEN, e.to_string()),
                BillingError::InvalidArgument(_) | BillingError::UnmappedPriceId(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                BillingError::FailedPrecondition(_) => (StatusCode::CONFLICT, e.to_string()),
                BillingError::UserNotFound(_) | BillingError::GiftCodeNotFound => {
                    (StatusCode::NOT_FOUND, e.to_string())
                }
                BillingError::WebhookSignatureInvalid => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                ),
            },
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn billing_errors_map_to_expected_statuses() {
        let cases = [
            (
                ApiError::from(BillingError::Unauthenticated),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::from(BillingError::PermissionDenied("no".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::from(BillingError::InvalidArgument("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(BillingError::FailedPrecondition("state".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(BillingError::UserNotFound(Uuid::new_v4())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(BillingError::GiftCodeNotFound),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(BillingError::Database("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_and_message().0, expected);
        }
    }

    #[test]
    fn server_errors_hide_detail() {
        let error = ApiError::from(BillingError::Database("password=hunter2".into()));
        let (_, message) = error.status_and_message();
        assert_eq!(message, "internal server error");
    }
}
