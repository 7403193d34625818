//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use daybook_billing::BillingService;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let billing = Arc::new(BillingService::from_env(pool.clone())?);
        Ok(Self {
            pool,
            config,
            jwt_manager,
            billing,
        })
    }

    /// State subset handed to the auth middleware.
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
