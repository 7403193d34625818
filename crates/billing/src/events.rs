//! Entitlement events and the pure transition function
//!
//! Webhook payloads are loosely typed; everything that can change a user's
//! entitlement is first mapped into an [`EntitlementEvent`] and run through
//! [`reduce`], a pure function from a snapshot of the user's entitlement
//! fields to the set of field updates to persist. This keeps the transition
//! rules testable without the Stripe SDK or a database.

use daybook_shared::{SubscriptionStatus, SubscriptionTier};
use time::OffsetDateTime;
use uuid::Uuid;

/// Snapshot of the entitlement fields on a user row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementState {
    pub tier: SubscriptionTier,
    pub status: String,
    pub interactions_this_month: i32,
    pub interactions_limit: i32,
    pub extra_interactions_purchased: i32,
}

impl EntitlementState {
    /// Default state for a user who has never purchased anything.
    pub fn free() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            status: SubscriptionStatus::Active.as_str().to_string(),
            interactions_this_month: 0,
            interactions_limit: 0,
            extra_interactions_purchased: 0,
        }
    }
}

/// One event per billing lifecycle change that can mutate entitlements.
#[derive(Debug, Clone)]
pub enum EntitlementEvent {
    /// `checkout.session.completed` in subscription mode, after the
    /// subscription object has been retrieved and its price resolved.
    SubscriptionActivated {
        tier: SubscriptionTier,
        subscription_id: String,
        customer_id: String,
        gifted_by: Option<Uuid>,
    },
    /// `checkout.session.completed` in payment mode carrying an
    /// extra-interaction quantity.
    ExtraInteractionsPurchased { quantity: i32 },
    /// `customer.subscription.updated`: mirror the provider status and
    /// current period end. Last-write-wins; events may arrive out of order.
    StatusSynced {
        status: String,
        period_end: Option<OffsetDateTime>,
    },
    /// `customer.subscription.deleted`.
    SubscriptionCanceled,
    /// `invoice.payment_failed`. Tier is untouched: a failed payment does
    /// not immediately revoke access.
    PaymentFailed,
}

/// Field-level updates produced by [`reduce`].
///
/// `None` / `false` means "leave the stored value alone". The service layer
/// applies this as a single targeted `UPDATE`, with the quota increments
/// executed as storage-side atomic additions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitlementUpdate {
    pub tier: Option<SubscriptionTier>,
    pub status: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub gifted_by: Option<Uuid>,
    /// Reinitialize the quota block to (0 used, tier base limit, 0 extra).
    pub reset_quota_block: bool,
    /// Atomic increment applied to both `interactions_limit` and
    /// `extra_interactions_purchased`.
    pub quota_increment: Option<i32>,
    /// Drop the stored subscription id. Only set on explicit cancellation,
    /// never on transient provider errors.
    pub clear_subscription_id: bool,
    pub period_end: Option<OffsetDateTime>,
    pub stamp_started_at: bool,
    pub stamp_canceled_at: bool,
    pub stamp_payment_failed_at: bool,
}

impl EntitlementUpdate {
    pub fn is_noop(&self) -> bool {
        *self == EntitlementUpdate::default()
    }
}

/// Compute the updates an event implies for the given state.
pub fn reduce(state: &EntitlementState, event: &EntitlementEvent) -> EntitlementUpdate {
    match event {
        EntitlementEvent::SubscriptionActivated {
            tier,
            subscription_id,
            customer_id,
            gifted_by,
        } => {
            // A redundant activation (webhook re-delivery) must not clobber
            // quota accumulated since the first delivery.
            let reset_quota_block =
                *tier == SubscriptionTier::Connect && state.tier != SubscriptionTier::Connect;
            EntitlementUpdate {
                tier: Some(*tier),
                status: Some(SubscriptionStatus::Active.as_str().to_string()),
                stripe_subscription_id: Some(subscription_id.clone()),
                stripe_customer_id: Some(customer_id.clone()),
                gifted_by: *gifted_by,
                reset_quota_block,
                stamp_started_at: true,
                ..Default::default()
            }
        }
        EntitlementEvent::ExtraInteractionsPurchased { quantity } => EntitlementUpdate {
            quota_increment: Some((*quantity).max(0)),
            ..Default::default()
        },
        EntitlementEvent::StatusSynced { status, period_end } => EntitlementUpdate {
            status: Some(status.clone()),
            period_end: *period_end,
            ..Default::default()
        },
        EntitlementEvent::SubscriptionCanceled => EntitlementUpdate {
            tier: Some(SubscriptionTier::Free),
            status: Some(SubscriptionStatus::Canceled.as_str().to_string()),
            clear_subscription_id: true,
            stamp_canceled_at: true,
            ..Default::default()
        },
        EntitlementEvent::PaymentFailed => EntitlementUpdate {
            status: Some(SubscriptionStatus::PastDue.as_str().to_string()),
            stamp_payment_failed_at: true,
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(tier: SubscriptionTier) -> EntitlementEvent {
        EntitlementEvent::SubscriptionActivated {
            tier,
            subscription_id: "sub_123".to_string(),
            customer_id: "cus_123".to_string(),
            gifted_by: None,
        }
    }

    #[test]
    fn connect_activation_initializes_quota_block() {
        let update = reduce(&EntitlementState::free(), &activation(SubscriptionTier::Connect));
        assert_eq!(update.tier, Some(SubscriptionTier::Connect));
        assert_eq!(update.status.as_deref(), Some("active"));
        assert!(update.reset_quota_block);
        assert!(update.stamp_started_at);
        assert_eq!(update.stripe_subscription_id.as_deref(), Some("sub_123"));
    }

    #[test]
    fn redundant_connect_activation_does_not_reset_quota() {
        let state = EntitlementState {
            tier: SubscriptionTier::Connect,
            status: "active".to_string(),
            interactions_this_month: 3,
            interactions_limit: 4,
            extra_interactions_purchased: 1,
        };
        let update = reduce(&state, &activation(SubscriptionTier::Connect));
        assert!(!update.reset_quota_block, "re-delivery must keep accumulated usage");
        // The rest of the update is value-identical to the first delivery.
        assert_eq!(update.tier, Some(SubscriptionTier::Connect));
        assert_eq!(update.status.as_deref(), Some("active"));
    }

    #[test]
    fn plus_activation_never_touches_quota() {
        let update = reduce(&EntitlementState::free(), &activation(SubscriptionTier::Plus));
        assert_eq!(update.tier, Some(SubscriptionTier::Plus));
        assert!(!update.reset_quota_block);
        assert!(update.quota_increment.is_none());
    }

    #[test]
    fn cancellation_downgrades_and_clears_subscription_link() {
        let state = EntitlementState {
            tier: SubscriptionTier::Connect,
            status: "active".to_string(),
            interactions_this_month: 2,
            interactions_limit: 4,
            extra_interactions_purchased: 0,
        };
        let update = reduce(&state, &EntitlementEvent::SubscriptionCanceled);
        assert_eq!(update.tier, Some(SubscriptionTier::Free));
        assert_eq!(update.status.as_deref(), Some("canceled"));
        assert!(update.clear_subscription_id);
        assert!(update.stamp_canceled_at);
    }

    #[test]
    fn payment_failure_keeps_tier() {
        let state = EntitlementState {
            tier: SubscriptionTier::Connect,
            status: SubscriptionStatus::Active.as_str().to_string(),
            interactions_this_month: 0,
            interactions_limit: 4,
            extra_interactions_purchased: 0,
        };
        let update = reduce(&state, &EntitlementEvent::PaymentFailed);
        assert_eq!(update.status.as_deref(), Some("past_due"));
        assert!(update.tier.is_none(), "grace period: access is not revoked");
        assert!(!update.clear_subscription_id);
    }

    #[test]
    fn status_sync_is_verbatim() {
        let update = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::StatusSynced {
                status: "incomplete_expired".to_string(),
                period_end: None,
            },
        );
        assert_eq!(update.status.as_deref(), Some("incomplete_expired"));
        assert!(update.tier.is_none());
    }

    #[test]
    fn extra_purchase_increments_limit_and_extra_together() {
        let update = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::ExtraInteractionsPurchased { quantity: 2 },
        );
        assert_eq!(update.quota_increment, Some(2));
        assert!(!update.reset_quota_block);
    }

    #[test]
    fn negative_purchase_quantity_is_floored() {
        let update = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::ExtraInteractionsPurchased { quantity: -5 },
        );
        assert_eq!(update.quota_increment, Some(0));
    }

    #[test]
    fn reducer_statuses_match_canonical_enum() {
        let activated = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::SubscriptionActivated {
                tier: SubscriptionTier::Plus,
                subscription_id: "sub_1".to_string(),
                customer_id: "cus_1".to_string(),
                gifted_by: None,
            },
        );
        assert_eq!(
            activated.status.as_deref(),
            Some(SubscriptionStatus::Active.as_str())
        );

        let canceled = reduce(&EntitlementState::free(), &EntitlementEvent::SubscriptionCanceled);
        assert_eq!(
            canceled.status.as_deref(),
            Some(SubscriptionStatus::Canceled.as_str())
        );

        let failed = reduce(&EntitlementState::free(), &EntitlementEvent::PaymentFailed);
        assert_eq!(
            failed.status.as_deref(),
            Some(SubscriptionStatus::PastDue.as_str())
        );
    }
}
