//! Billing routes: checkout, subscription status, extra interactions, webhooks

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use daybook_billing::CheckoutRequest;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// POST /billing/checkout-session
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state
        .billing
        .checkout
        .create_checkout_session(user.user_id, req)
        .await?;
    Ok(Json(response))
}

/// GET /billing/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let view = state.billing.entitlements.get_status(user.user_id).await?;
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtraInteractionRequest {
    pub quantity: Option<i32>,
}

/// POST /billing/extra-interactions
pub async fn purchase_extra_interactions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Option<Json<ExtraInteractionRequest>>,
) -> ApiResult<impl IntoResponse> {
    let quantity = body.and_then(|Json(req)| req.quantity);
    let response = state
        .billing
        .checkout
        .purchase_extra_interaction(user.user_id, quantity)
        .await?;
    Ok(Json(response))
}

/// POST /billing/webhook
///
/// Unauthenticated; trust comes from the Stripe signature header. Processing
/// failures return 500 so Stripe retries the delivery.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing stripe-signature header" })),
        );
    };

    let event = match state.billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "webhook signature verification failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid webhook signature" })),
            );
        }
    };

    match state.billing.webhooks.handle_event(event).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "received": true }))),
        Err(err) => {
            tracing::error!(error = %err, "webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "webhook processing failed" })),
            )
        }
    }
}
