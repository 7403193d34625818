// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement System
//!
//! Tests critical boundary conditions in:
//! - Entitlement transitions (ENT-01 to ENT-07)
//! - Gift codes (GIFT-01 to GIFT-08)
//! - Extra interaction purchases (XTRA-01 to XTRA-05)
//! - Tier parsing (TIER-01 to TIER-04)

#[cfg(test)]
mod entitlement_transition_tests {
    use crate::events::{reduce, EntitlementEvent, EntitlementState};
    use daybook_shared::SubscriptionTier;
    use uuid::Uuid;

    fn connect_state(used: i32, limit: i32, extra: i32) -> EntitlementState {
        EntitlementState {
            tier: SubscriptionTier::Connect,
            status: "active".to_string(),
            interactions_this_month: used,
            interactions_limit: limit,
            extra_interactions_purchased: extra,
        }
    }

    // =========================================================================
    // ENT-01: Activation delivered twice - second delivery keeps usage
    // =========================================================================
    #[test]
    fn test_double_delivery_preserves_consumed_quota() {
        let event = EntitlementEvent::SubscriptionActivated {
            tier: SubscriptionTier::Connect,
            subscription_id: "sub_abc".to_string(),
            customer_id: "cus_abc".to_string(),
            gifted_by: None,
        };

        let first = reduce(&EntitlementState::free(), &event);
        assert!(first.reset_quota_block, "first delivery initializes quota");

        // State after the first delivery has accumulated usage.
        let second = reduce(&connect_state(3, 5, 1), &event);
        assert!(
            !second.reset_quota_block,
            "re-delivery must not wipe usage or purchased extras"
        );
    }

    // =========================================================================
    // ENT-02: Upgrade Plus -> Connect initializes the quota block
    // =========================================================================
    #[test]
    fn test_upgrade_to_connect_initializes_quota() {
        let plus_state = EntitlementState {
            tier: SubscriptionTier::Plus,
            status: "active".to_string(),
            interactions_this_month: 0,
            interactions_limit: 0,
            extra_interactions_purchased: 0,
        };
        let update = reduce(
            &plus_state,
            &EntitlementEvent::SubscriptionActivated {
                tier: SubscriptionTier::Connect,
                subscription_id: "sub_up".to_string(),
                customer_id: "cus_up".to_string(),
                gifted_by: None,
            },
        );
        assert!(update.reset_quota_block);
        assert_eq!(update.tier, Some(SubscriptionTier::Connect));
    }

    // =========================================================================
    // ENT-03: Cancel then late status sync - sync wins (last write)
    // =========================================================================
    #[test]
    fn test_status_sync_after_cancel_still_applies() {
        let canceled = EntitlementState {
            tier: SubscriptionTier::Free,
            status: "canceled".to_string(),
            interactions_this_month: 0,
            interactions_limit: 0,
            extra_interactions_purchased: 0,
        };
        let update = reduce(
            &canceled,
            &EntitlementEvent::StatusSynced {
                status: "active".to_string(),
                period_end: None,
            },
        );
        // Status mirroring is unconditional; ordering is the provider's
        // responsibility and the sync never touches the tier.
        assert_eq!(update.status.as_deref(), Some("active"));
        assert!(update.tier.is_none());
    }

    // =========================================================================
    // ENT-04: Payment failure during grace does not clear subscription id
    // =========================================================================
    #[test]
    fn test_payment_failure_is_reversible() {
        let update = reduce(&connect_state(1, 4, 0), &EntitlementEvent::PaymentFailed);
        assert!(!update.clear_subscription_id);
        assert!(update.tier.is_none());
        assert!(update.stamp_payment_failed_at);
    }

    // =========================================================================
    // ENT-05: Cancellation from free is value-idempotent
    // =========================================================================
    #[test]
    fn test_cancel_from_free_produces_same_terminal_state() {
        let update = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::SubscriptionCanceled,
        );
        assert_eq!(update.tier, Some(SubscriptionTier::Free));
        assert_eq!(update.status.as_deref(), Some("canceled"));
    }

    // =========================================================================
    // ENT-06: Gifted activation records the practitioner link
    // =========================================================================
    #[test]
    fn test_gifted_activation_carries_gifter() {
        let practitioner = Uuid::new_v4();
        let update = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::SubscriptionActivated {
                tier: SubscriptionTier::Plus,
                subscription_id: "sub_g".to_string(),
                customer_id: "cus_g".to_string(),
                gifted_by: Some(practitioner),
            },
        );
        assert_eq!(update.gifted_by, Some(practitioner));
    }

    // =========================================================================
    // ENT-07: Zero-quantity purchase is a structural no-op increment
    // =========================================================================
    #[test]
    fn test_zero_quantity_purchase() {
        let update = reduce(
            &EntitlementState::free(),
            &EntitlementEvent::ExtraInteractionsPurchased { quantity: 0 },
        );
        assert_eq!(update.quota_increment, Some(0));
        assert!(update.tier.is_none());
        assert!(!update.reset_quota_block);
    }
}

#[cfg(test)]
mod gift_code_tests {
    use crate::gifts::{
        clamp_discount, generate_gift_code, GiftAvailability, GiftMembership, GIFT_CODE_ALPHABET,
        GIFT_CODE_LENGTH,
    };
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn gift(redeemed: usize, max_uses: i32, expires_in: Duration) -> GiftMembership {
        GiftMembership {
            code: "ABCD2345".to_string(),
            created_by: Uuid::new_v4(),
            created_by_email: "practitioner@example.com".to_string(),
            discount_percent: 1.0,
            max_uses,
            recipient_email: None,
            redeemed_by: (0..redeemed).map(|_| Uuid::new_v4()).collect(),
            expires_at: OffsetDateTime::now_utc() + expires_in,
            status: "active".to_string(),
        }
    }

    // =========================================================================
    // GIFT-01: Generated codes only use the unambiguous alphabet
    // =========================================================================
    #[test]
    fn test_generated_codes_use_safe_alphabet() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let code = generate_gift_code(&mut rng);
            assert_eq!(code.len(), GIFT_CODE_LENGTH);
            for byte in code.bytes() {
                assert!(
                    GIFT_CODE_ALPHABET.contains(&byte),
                    "unexpected character {} in code {}",
                    byte as char,
                    code
                );
            }
            // The visually ambiguous characters are excluded outright.
            for excluded in ['0', '1', 'I', 'O'] {
                assert!(!code.contains(excluded));
            }
        }
    }

    // =========================================================================
    // GIFT-02: Discount below floor clamps to 50%
    // =========================================================================
    #[test]
    fn test_discount_clamps_to_floor() {
        assert_eq!(clamp_discount(0.1), 0.5);
        assert_eq!(clamp_discount(0.0), 0.5);
        assert_eq!(clamp_discount(-1.0), 0.5);
    }

    // =========================================================================
    // GIFT-03: Discount above ceiling clamps to 100%
    // =========================================================================
    #[test]
    fn test_discount_clamps_to_ceiling() {
        assert_eq!(clamp_discount(1.5), 1.0);
        assert_eq!(clamp_discount(100.0), 1.0);
    }

    // =========================================================================
    // GIFT-04: Non-finite discount falls back to the floor
    // =========================================================================
    #[test]
    fn test_nan_discount_falls_to_floor() {
        assert_eq!(clamp_discount(f64::NAN), 0.5);
    }

    // =========================================================================
    // GIFT-05: Code at exactly max_uses redemptions is fully redeemed
    // =========================================================================
    #[test]
    fn test_exactly_max_uses_is_exhausted() {
        let g = gift(3, 3, Duration::days(30));
        assert_eq!(
            g.availability(OffsetDateTime::now_utc()),
            GiftAvailability::FullyRedeemed
        );
    }

    // =========================================================================
    // GIFT-06: One redemption left is still available
    // =========================================================================
    #[test]
    fn test_one_use_remaining_is_available() {
        let g = gift(2, 3, Duration::days(30));
        assert_eq!(
            g.availability(OffsetDateTime::now_utc()),
            GiftAvailability::Available
        );
    }

    // =========================================================================
    // GIFT-07: Expiry takes precedence over exhaustion
    // =========================================================================
    #[test]
    fn test_expired_and_exhausted_reports_expired() {
        let g = gift(3, 3, Duration::days(-1));
        assert_eq!(
            g.availability(OffsetDateTime::now_utc()),
            GiftAvailability::Expired
        );
    }

    // =========================================================================
    // GIFT-08: Expiry boundary - a code is usable through its expiry instant
    // =========================================================================
    #[test]
    fn test_code_valid_at_expiry_instant() {
        let now = OffsetDateTime::now_utc();
        let mut g = gift(0, 1, Duration::ZERO);
        g.expires_at = now;
        assert_eq!(g.availability(now), GiftAvailability::Available);
        assert_eq!(
            g.availability(now + Duration::seconds(1)),
            GiftAvailability::Expired
        );
    }
}

#[cfg(test)]
mod extra_interaction_tests {
    use crate::checkout::{clamp_extra_quantity, MAX_EXTRA_INTERACTIONS};

    // =========================================================================
    // XTRA-01: Request exactly the remaining allowance
    // =========================================================================
    #[test]
    fn test_request_exactly_remaining() {
        assert_eq!(clamp_extra_quantity(Some(MAX_EXTRA_INTERACTIONS), 0), 3);
    }

    // =========================================================================
    // XTRA-02: Request over the cap is clamped down
    // =========================================================================
    #[test]
    fn test_request_over_cap_clamps() {
        assert_eq!(clamp_extra_quantity(Some(10), 0), MAX_EXTRA_INTERACTIONS);
        assert_eq!(clamp_extra_quantity(Some(10), 2), 1);
    }

    // =========================================================================
    // XTRA-03: One below the cap leaves exactly one purchasable
    // =========================================================================
    #[test]
    fn test_one_below_cap() {
        assert_eq!(
            clamp_extra_quantity(Some(2), MAX_EXTRA_INTERACTIONS - 1),
            1
        );
    }

    // =========================================================================
    // XTRA-04: At the cap nothing is purchasable
    // =========================================================================
    #[test]
    fn test_at_cap_clamps_to_zero() {
        assert_eq!(clamp_extra_quantity(Some(1), MAX_EXTRA_INTERACTIONS), 0);
    }

    // =========================================================================
    // XTRA-05: Missing quantity defaults to one
    // =========================================================================
    #[test]
    fn test_missing_quantity_defaults() {
        assert_eq!(clamp_extra_quantity(None, 1), 1);
    }
}

#[cfg(test)]
mod tier_parsing_tests {
    use daybook_shared::SubscriptionTier;

    // =========================================================================
    // TIER-01: Known tiers round-trip through their string form
    // =========================================================================
    #[test]
    fn test_known_tiers_round_trip() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Plus,
            SubscriptionTier::Connect,
        ] {
            assert_eq!(SubscriptionTier::from_str_or_free(tier.as_str()), tier);
        }
    }

    // =========================================================================
    // TIER-02: Unknown tier strings degrade to free, never to paid
    // =========================================================================
    #[test]
    fn test_unknown_tier_degrades_to_free() {
        assert_eq!(
            SubscriptionTier::from_str_or_free("enterprise"),
            SubscriptionTier::Free
        );
        assert_eq!(SubscriptionTier::from_str_or_free(""), SubscriptionTier::Free);
    }

    // =========================================================================
    // TIER-03: Only Connect carries a base interaction allowance
    // =========================================================================
    #[test]
    fn test_only_connect_has_allowance() {
        assert_eq!(SubscriptionTier::Connect.base_interaction_limit(), 4);
        assert_eq!(SubscriptionTier::Plus.base_interaction_limit(), 0);
        assert_eq!(SubscriptionTier::Free.base_interaction_limit(), 0);
    }

    // =========================================================================
    // TIER-04: The top tier cannot upgrade further
    // =========================================================================
    #[test]
    fn test_top_tier_cannot_upgrade() {
        assert!(SubscriptionTier::Free.can_upgrade());
        assert!(SubscriptionTier::Plus.can_upgrade());
        assert!(!SubscriptionTier::Connect.can_upgrade());
    }
}
