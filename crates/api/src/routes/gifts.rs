//! Gift membership routes

use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde::Deserialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGiftRequest {
    pub discount_percent: f64,
    #[serde(default = "default_max_uses")]
    pub max_uses: i32,
    pub expiration_days: Option<i64>,
    pub recipient_email: Option<String>,
}

fn default_max_uses() -> i32 {
    1
}

/// POST /gifts
///
/// Only approved practitioners may create gift memberships; the billing
/// layer enforces this.
pub async fn create_gift(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateGiftRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = state
        .billing
        .gifts
        .create(
            user.user_id,
            req.discount_percent,
            req.max_uses,
            req.expiration_days,
            req.recipient_email,
        )
        .await?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct ValidateGiftRequest {
    pub code: String,
}

/// POST /gifts/validate
///
/// Read-only lookup; never consumes a redemption slot.
pub async fn validate_gift(
    State(state): State<AppState>,
    Json(req): Json<ValidateGiftRequest>,
) -> ApiResult<impl IntoResponse> {
    let validation = state.billing.gifts.validate(&req.code).await?;
    Ok(Json(validation))
}
