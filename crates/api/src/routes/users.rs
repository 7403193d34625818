//! User profile routes

use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ProfileRequest {
    pub email: Option<String>,
}

/// POST /users/profile
///
/// Upserts the caller's profile row. New users start on the free tier
/// with defaults from the schema.
pub async fn upsert_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Option<Json<ProfileRequest>>,
) -> ApiResult<impl IntoResponse> {
    let email = body
        .and_then(|Json(req)| req.email)
        .or(user.email.clone())
        .ok_or_else(|| ApiError::BadRequest("email is required".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO users (id, email)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, updated_at = NOW()
        "#,
    )
    .bind(user.user_id)
    .bind(&email)
    .execute(&state.pool)
    .await
    .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(Json(json!({ "userId": user.user_id, "email": email })))
}
