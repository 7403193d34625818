//! Bearer-token authentication middleware

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;

use super::jwt::JwtManager;

/// State shared with the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

pub fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Rejects requests without a valid bearer token; on success inserts
/// [`AuthUser`] into request extensions for handlers to extract.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return unauthorized("missing bearer token");
    };

    match auth_state.jwt_manager.verify_token(token) {
        Ok((user_id, claims)) => {
            request.extensions_mut().insert(AuthUser {
                user_id,
                email: claims.email,
            });
            next.run(request).await
        }
        Err(err) => {
            tracing::debug!(error = %err, "rejected bearer token");
            unauthorized("invalid or expired token")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: &str) -> Request {
        Request::builder()
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn extracts_bearer_token() {
        let request = request_with_auth("Bearer abc123");
        assert_eq!(extract_bearer_token(&request), Some("abc123"));
    }

    #[test]
    fn rejects_non_bearer_schemes() {
        let request = request_with_auth("Basic dXNlcjpwYXNz");
        assert_eq!(extract_bearer_token(&request), None);
    }

    #[test]
    fn rejects_missing_header() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer_token(&request), None);
    }
}
