//! HTTP route definitions

use axum::{
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;

use crate::{auth::require_auth, state::AppState};

pub mod billing;
pub mod gifts;
pub mod interactions;
pub mod users;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let protected = Router::new()
        .route(
            "/billing/checkout-session",
            post(billing::create_checkout_session),
        )
        .route("/billing/subscription", get(billing::get_subscription))
        .route(
            "/billing/extra-interactions",
            post(billing::purchase_extra_interactions),
        )
        .route("/gifts", post(gifts::create_gift))
        .route("/interactions/track", post(interactions::track_interaction))
        .route("/users/profile", post(users::upsert_profile))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Gift validation stays public: prospective members check a code
    // before they have an account or a token.
    Router::new()
        .route("/health", get(health))
        .route("/billing/webhook", post(billing::stripe_webhook))
        .route("/gifts/validate", post(gifts::validate_gift))
        .merge(protected)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use daybook_billing::{BillingService, PriceIds, StripeConfig};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::auth::JwtManager;
    use crate::config::Config;

    // Lazy pool: nothing here touches the database until a handler runs a
    // query, which the routing assertions below never depend on succeeding.
    fn test_state() -> AppState {
        let database_url = "postgres://localhost:5432/daybook_test";
        let pool = PgPoolOptions::new().connect_lazy(database_url).unwrap();
        let config = Config {
            database_url: database_url.to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 24,
        };
        let stripe = StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds {
                plus_monthly: "price_plus_monthly".to_string(),
                connect_monthly: "price_connect_monthly".to_string(),
            },
            app_url: "http://localhost:3000".to_string(),
        };
        let billing = Arc::new(BillingService::new(stripe, pool.clone()));
        AppState {
            pool,
            config,
            jwt_manager: JwtManager::new("test-secret", 24),
            billing,
        }
    }

    #[tokio::test]
    async fn gift_validation_does_not_require_auth() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/gifts/validate")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"code":"ABCD2345"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        // No token supplied; the request must reach the handler rather than
        // be rejected by the auth layer.
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        for (method, uri) in [
            ("GET", "/billing/subscription"),
            ("POST", "/billing/checkout-session"),
            ("POST", "/gifts"),
            ("POST", "/interactions/track"),
        ] {
            let response = create_router(test_state())
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(
                response.status(),
                StatusCode::UNAUTHORIZED,
                "{method} {uri} must require a bearer token"
            );
        }
    }
}
