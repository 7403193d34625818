//! Checkout session orchestration
//!
//! Builds Stripe checkout sessions for plan subscriptions and one-time
//! extra-interaction purchases. Session metadata carries everything the
//! webhook handler needs to recover the user and any gift code without a
//! second lookup.

use std::collections::HashMap;

use daybook_shared::SubscriptionTier;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CouponDuration, CreateCheckoutSession,
    CreateCheckoutSessionDiscounts, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, CreateCheckoutSessionSubscriptionData,
    CreateCoupon, Coupon, Currency, CustomerId,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::gifts::{GiftAvailability, GiftCodeService};

/// Price of one extra practitioner interaction, in cents.
pub const EXTRA_INTERACTION_PRICE_CENTS: i64 = 999;

/// Maximum extra interactions purchasable per monthly cycle.
pub const MAX_EXTRA_INTERACTIONS: i32 = 3;

/// Checkout mode requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    #[default]
    Subscription,
    Payment,
}

/// Caller-supplied checkout parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: String,
    #[serde(default)]
    pub mode: CheckoutMode,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub gift_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraInteractionCheckout {
    pub session_id: String,
    pub url: String,
    pub quantity: i32,
}

/// Clamp a requested extra-interaction quantity to what the cycle allows.
pub fn clamp_extra_quantity(requested: Option<i32>, already_purchased: i32) -> i32 {
    let remaining = (MAX_EXTRA_INTERACTIONS - already_purchased).max(0);
    requested.unwrap_or(1).max(1).min(remaining)
}

/// Orchestrates provider checkout sessions.
#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a checkout session for a plan purchase.
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
        req: CheckoutRequest,
    ) -> BillingResult<CheckoutResponse> {
        let config = self.stripe.config().clone();

        if req.mode == CheckoutMode::Subscription && !config.price_ids.contains(&req.price_id) {
            return Err(BillingError::InvalidArgument(format!(
                "unknown price id: {}",
                req.price_id
            )));
        }

        let customer_service = CustomerService::new(self.stripe.clone(), self.pool.clone());
        let customer_id = customer_service.get_or_create(user_id).await?;

        // A supplied gift code must be usable; lookup failure or an unusable
        // code fails the whole call rather than silently dropping the
        // discount.
        let mut discount_percent: Option<f64> = None;
        if let Some(code) = &req.gift_code {
            let gifts = GiftCodeService::new(self.pool.clone(), config.app_url.clone());
            let gift = gifts.fetch(code).await?.ok_or(BillingError::GiftCodeNotFound)?;
            match gift.availability(OffsetDateTime::now_utc()) {
                GiftAvailability::Expired => {
                    return Err(BillingError::FailedPrecondition(
                        "gift code has expired".to_string(),
                    ));
                }
                GiftAvailability::FullyRedeemed => {
                    return Err(BillingError::FailedPrecondition(
                        "gift code has already been used".to_string(),
                    ));
                }
                GiftAvailability::Available => discount_percent = Some(gift.discount_percent),
            }
        }

        let mut metadata: HashMap<String, String> = req.metadata.clone().unwrap_or_default();
        metadata.insert("user_id".to_string(), user_id.to_string());
        if let Some(code) = &req.gift_code {
            metadata.insert("gift_code".to_string(), code.to_uppercase());
        }

        let success_url = req
            .success_url
            .unwrap_or_else(|| format!("{}/app?session_id={{CHECKOUT_SESSION_ID}}", config.app_url));
        let cancel_url = req
            .cancel_url
            .unwrap_or_else(|| format!("{}/app", config.app_url));

        let customer: CustomerId = customer_id
            .parse()
            .map_err(|_| BillingError::Internal(format!("invalid customer id: {customer_id}")))?;

        let mut params = CreateCheckoutSession::new();
        params.customer = Some(customer);
        params.mode = Some(match req.mode {
            CheckoutMode::Subscription => CheckoutSessionMode::Subscription,
            CheckoutMode::Payment => CheckoutSessionMode::Payment,
        });
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(req.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.metadata = Some(metadata);

        // Subscriptions and sessions are separate provider objects with
        // independently queryable metadata; stamp the user id on both.
        if req.mode == CheckoutMode::Subscription {
            params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(HashMap::from([(
                    "user_id".to_string(),
                    user_id.to_string(),
                )])),
                ..Default::default()
            });
        }

        if let Some(percent) = discount_percent {
            let coupon_name = format!("Gift from practitioner ({:.0}% off)", percent * 100.0);
            let mut coupon_params = CreateCoupon::new();
            coupon_params.percent_off = Some(percent * 100.0);
            // Applies for the life of the subscription, not just the first
            // invoice.
            coupon_params.duration = Some(CouponDuration::Forever);
            coupon_params.name = Some(&coupon_name);
            let coupon = Coupon::create(self.stripe.inner(), coupon_params).await?;

            params.discounts = Some(vec![CreateCheckoutSessionDiscounts {
                coupon: Some(coupon.id.to_string()),
                ..Default::default()
            }]);
        }

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let url = session
            .url
            .clone()
            .ok_or_else(|| BillingError::Internal("checkout session has no url".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            mode = ?req.mode,
            gift_code = ?req.gift_code,
            "Checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Create a one-time payment session for extra practitioner
    /// interactions. Connect tier only; quantity is clamped to the cycle's
    /// remaining allowance.
    pub async fn purchase_extra_interaction(
        &self,
        user_id: Uuid,
        quantity: Option<i32>,
    ) -> BillingResult<ExtraInteractionCheckout> {
        let row: Option<(String, i32)> = sqlx::query_as(
            "SELECT subscription_tier, extra_interactions_purchased FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (tier, already_purchased) = row.ok_or(BillingError::UserNotFound(user_id))?;
        if SubscriptionTier::from_str_or_free(&tier) != SubscriptionTier::Connect {
            return Err(BillingError::FailedPrecondition(
                "must be on Connect tier to purchase extra interactions".to_string(),
            ));
        }
        if already_purchased >= MAX_EXTRA_INTERACTIONS {
            return Err(BillingError::FailedPrecondition(
                "maximum extra interactions already purchased this month".to_string(),
            ));
        }

        let allowed = clamp_extra_quantity(quantity, already_purchased);

        let customer_service = CustomerService::new(self.stripe.clone(), self.pool.clone());
        let customer_id = customer_service.get_or_create(user_id).await?;
        let customer: CustomerId = customer_id
            .parse()
            .map_err(|_| BillingError::Internal(format!("invalid customer id: {customer_id}")))?;

        let config = self.stripe.config();
        let success_url = format!("{}/app?extra_purchased=true", config.app_url);
        let cancel_url = format!("{}/app", config.app_url);

        let mut params = CreateCheckoutSession::new();
        params.customer = Some(customer);
        params.mode = Some(CheckoutSessionMode::Payment);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: "Extra practitioner interaction".to_string(),
                    description: Some(
                        "Additional monthly interaction with your connected practitioner"
                            .to_string(),
                    ),
                    ..Default::default()
                }),
                unit_amount: Some(EXTRA_INTERACTION_PRICE_CENTS),
                ..Default::default()
            }),
            quantity: Some(allowed as u64),
            ..Default::default()
        }]);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.metadata = Some(HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("extra_interactions".to_string(), allowed.to_string()),
        ]));

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let url = session
            .url
            .clone()
            .ok_or_else(|| BillingError::Internal("checkout session has no url".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            quantity = allowed,
            "Extra interaction checkout created"
        );

        Ok(ExtraInteractionCheckout {
            session_id: session.id.to_string(),
            url,
            quantity: allowed,
        })
    }
}
