//! Practitioner interaction tracking

use axum::{extract::State, response::IntoResponse, Extension, Json};

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// POST /interactions/track
///
/// Atomically consumes one practitioner interaction from the caller's
/// monthly allowance, spilling into purchased extras when the base
/// allowance is exhausted.
pub async fn track_interaction(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let result = state.billing.quota.consume(user.user_id).await?;
    Ok(Json(result))
}
