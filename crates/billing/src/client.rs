//! Stripe client wrapper and configuration

use daybook_shared::SubscriptionTier;

use crate::error::{BillingError, BillingResult};

/// Stripe price ids for each purchasable plan.
///
/// Tier derivation from a price id is an exact lookup against these values.
/// An id outside this table is a configuration or provider mismatch and is
/// surfaced as a hard error rather than silently downgrading the user.
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub plus_monthly: String,
    pub connect_monthly: String,
}

impl PriceIds {
    /// Resolve the tier a price id purchases.
    pub fn tier_for_price(&self, price_id: &str) -> BillingResult<SubscriptionTier> {
        if price_id == self.plus_monthly {
            Ok(SubscriptionTier::Plus)
        } else if price_id == self.connect_monthly {
            Ok(SubscriptionTier::Connect)
        } else {
            Err(BillingError::UnmappedPriceId(price_id.to_string()))
        }
    }

    /// Whether a price id is purchasable at all.
    pub fn contains(&self, price_id: &str) -> bool {
        self.tier_for_price(price_id).is_ok()
    }
}

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
    /// Base URL of the web app, used for checkout redirect destinations.
    pub app_url: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;
        let plus_monthly = require_env("STRIPE_PRICE_PLUS_MONTHLY")?;
        let connect_monthly = require_env("STRIPE_PRICE_CONNECT_MONTHLY")?;
        let app_url =
            std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            price_ids: PriceIds {
                plus_monthly,
                connect_monthly,
            },
            app_url,
        })
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name)
        .map_err(|_| BillingError::Internal(format!("missing required env var {name}")))
}

/// Thin wrapper around the async-stripe client carrying our config alongside.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
