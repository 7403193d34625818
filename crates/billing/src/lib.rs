// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Daybook Billing Module
//!
//! Handles Stripe integration for subscription entitlements, gift
//! memberships, and practitioner interaction quotas.
//!
//! ## Features
//!
//! - **Checkout**: Create sessions for plan subscriptions and one-time
//!   extra-interaction purchases
//! - **Webhooks**: Reconcile provider events into entitlement state
//! - **Entitlements**: Single reducer for all subscription field changes
//! - **Gift Memberships**: Practitioner-created discount codes
//! - **Quotas**: Monthly interaction allowance tracking and reset
//! - **Invariants**: Runnable consistency checks over the whole system

pub mod checkout;
pub mod client;
pub mod customer;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod gifts;
pub mod invariants;
pub mod quota;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{
    CheckoutMode, CheckoutRequest, CheckoutResponse, CheckoutService, ExtraInteractionCheckout,
    EXTRA_INTERACTION_PRICE_CENTS, MAX_EXTRA_INTERACTIONS,
};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Entitlement
pub use entitlement::{EntitlementService, SubscriptionStatusView};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{reduce, EntitlementEvent, EntitlementState, EntitlementUpdate};

// Gifts
pub use gifts::{
    CreatedGift, GiftAvailability, GiftCodeService, GiftMembership, GiftValidation, RedeemOutcome,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Quota
pub use quota::{ConsumeResult, QuotaTracker};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub entitlements: EntitlementService,
    pub gifts: GiftCodeService,
    pub invariants: InvariantChecker,
    pub quota: QuotaTracker,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        let app_url = stripe.config().app_url.clone();
        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            customer: CustomerService::new(stripe.clone(), pool.clone()),
            entitlements: EntitlementService::new(pool.clone()),
            gifts: GiftCodeService::new(pool.clone(), app_url),
            invariants: InvariantChecker::new(pool.clone()),
            quota: QuotaTracker::new(pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
