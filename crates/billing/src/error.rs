//! Billing error types

/// Result alias used throughout the billing crate.
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by billing operations.
///
/// The variants mirror the caller-facing error taxonomy: handlers map them
/// to HTTP statuses, and everything provider-internal stays in the logs.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition failed: {0}")]
    FailedPrecondition(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("user not found: {0}")]
    UserNotFound(uuid::Uuid),

    #[error("gift code not found")]
    GiftCodeNotFound,

    #[error("price id is not mapped to a tier: {0}")]
    UnmappedPriceId(String),

    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("unsupported webhook payload: {0}")]
    WebhookEventNotSupported(String),

    #[error("stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}
