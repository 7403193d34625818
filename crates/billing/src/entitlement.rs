//! Entitlement state machine service
//!
//! The authoritative mapping from (tier, status, quota fields) to what a
//! caller may do. All mutations flow through [`EntitlementService::apply`],
//! which reduces an event against the stored snapshot and persists the
//! result as a single targeted update (never a whole-row overwrite).

use daybook_shared::SubscriptionTier;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{reduce, EntitlementEvent, EntitlementState, EntitlementUpdate};

/// Read-only view of a user's subscription, returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusView {
    pub tier: SubscriptionTier,
    pub status: String,
    pub interactions_this_month: i32,
    pub interactions_limit: i32,
    pub extra_interactions_purchased: i32,
    pub gifted_by: Option<Uuid>,
    pub can_upgrade: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct EntitlementRow {
    subscription_tier: String,
    subscription_status: String,
    interactions_this_month: i32,
    interactions_limit: i32,
    extra_interactions_purchased: i32,
    gifted_by: Option<Uuid>,
}

/// Service over the entitlement fields of the `users` table.
#[derive(Clone)]
pub struct EntitlementService {
    pool: PgPool,
}

impl EntitlementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current subscription status for a user. No side effects.
    pub async fn get_status(&self, user_id: Uuid) -> BillingResult<SubscriptionStatusView> {
        let row = self.fetch_row(user_id).await?;
        let tier = SubscriptionTier::from_str_or_free(&row.subscription_tier);

        Ok(SubscriptionStatusView {
            tier,
            status: row.subscription_status,
            interactions_this_month: row.interactions_this_month,
            interactions_limit: row.interactions_limit,
            extra_interactions_purchased: row.extra_interactions_purchased,
            gifted_by: row.gifted_by,
            can_upgrade: tier.can_upgrade(),
        })
    }

    /// Reduce an event against the stored snapshot and persist the result.
    pub async fn apply(&self, user_id: Uuid, event: &EntitlementEvent) -> BillingResult<()> {
        let state = self.load_state(user_id).await?;
        let update = reduce(&state, event);

        if update.is_noop() {
            return Ok(());
        }
        self.persist(user_id, &update).await
    }

    /// Activate a subscription after checkout completion.
    pub async fn apply_subscription_activation(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
        subscription_id: &str,
        customer_id: &str,
        gifted_by: Option<Uuid>,
    ) -> BillingResult<()> {
        self.apply(
            user_id,
            &EntitlementEvent::SubscriptionActivated {
                tier,
                subscription_id: subscription_id.to_string(),
                customer_id: customer_id.to_string(),
                gifted_by,
            },
        )
        .await
    }

    /// Explicit cancellation. Tier drops to free.
    pub async fn apply_cancellation(&self, user_id: Uuid) -> BillingResult<()> {
        self.apply(user_id, &EntitlementEvent::SubscriptionCanceled).await
    }

    /// Payment failure. Status only; tier keeps its grace.
    pub async fn apply_payment_failure(&self, user_id: Uuid) -> BillingResult<()> {
        self.apply(user_id, &EntitlementEvent::PaymentFailed).await
    }

    async fn load_state(&self, user_id: Uuid) -> BillingResult<EntitlementState> {
        let row = self.fetch_row(user_id).await?;
        Ok(EntitlementState {
            tier: SubscriptionTier::from_str_or_free(&row.subscription_tier),
            status: row.subscription_status,
            interactions_this_month: row.interactions_this_month,
            interactions_limit: row.interactions_limit,
            extra_interactions_purchased: row.extra_interactions_purchased,
        })
    }

    async fn fetch_row(&self, user_id: Uuid) -> BillingResult<EntitlementRow> {
        let row: Option<EntitlementRow> = sqlx::query_as(
            r#"
            SELECT subscription_tier, subscription_status,
                   interactions_this_month, interactions_limit,
                   extra_interactions_purchased, gifted_by
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(BillingError::UserNotFound(user_id))
    }

    /// Apply an update as one targeted statement. The quota increments run
    /// storage-side so concurrent consumption cannot lose them.
    async fn persist(&self, user_id: Uuid, update: &EntitlementUpdate) -> BillingResult<()> {
        let reset_limit = update
            .tier
            .unwrap_or(SubscriptionTier::Connect)
            .base_interaction_limit();

        let result = sqlx::query(
            r#"
            UPDATE users SET
                subscription_tier = COALESCE($2, subscription_tier),
                subscription_status = COALESCE($3, subscription_status),
                stripe_subscription_id = CASE
                    WHEN $4 THEN NULL
                    ELSE COALESCE($5, stripe_subscription_id)
                END,
                stripe_customer_id = COALESCE($6, stripe_customer_id),
                gifted_by = COALESCE($7, gifted_by),
                interactions_this_month = CASE
                    WHEN $8 THEN 0
                    ELSE interactions_this_month
                END,
                interactions_limit = CASE
                    WHEN $8 THEN $9
                    ELSE interactions_limit + COALESCE($10, 0)
                END,
                extra_interactions_purchased = CASE
                    WHEN $8 THEN 0
                    ELSE extra_interactions_purchased + COALESCE($10, 0)
                END,
                subscription_period_end = COALESCE($11, subscription_period_end),
                subscription_started_at = CASE
                    WHEN $12 THEN NOW()
                    ELSE subscription_started_at
                END,
                subscription_canceled_at = CASE
                    WHEN $13 THEN NOW()
                    ELSE subscription_canceled_at
                END,
                last_payment_failed_at = CASE
                    WHEN $14 THEN NOW()
                    ELSE last_payment_failed_at
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(update.tier.map(|t| t.as_str()))
        .bind(update.status.as_deref())
        .bind(update.clear_subscription_id)
        .bind(update.stripe_subscription_id.as_deref())
        .bind(update.stripe_customer_id.as_deref())
        .bind(update.gifted_by)
        .bind(update.reset_quota_block)
        .bind(reset_limit)
        .bind(update.quota_increment)
        .bind(update.period_end)
        .bind(update.stamp_started_at)
        .bind(update.stamp_canceled_at)
        .bind(update.stamp_payment_failed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::UserNotFound(user_id));
        }

        tracing::info!(
            user_id = %user_id,
            tier = ?update.tier,
            status = ?update.status,
            "Entitlement updated"
        );
        Ok(())
    }
}
