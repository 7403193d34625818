//! Core subscription types

use serde::{Deserialize, Serialize};

/// Subscription plan level governing feature access.
///
/// Connect is the top tier and includes a monthly allowance of practitioner
/// interactions; Plus unlocks the assistant features; Free is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Plus,
    Connect,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Plus => "plus",
            SubscriptionTier::Connect => "connect",
        }
    }

    /// Parse a tier from its stored string form. Unknown values map to Free
    /// so a corrupted row degrades access rather than granting it.
    pub fn from_str_or_free(s: &str) -> Self {
        match s {
            "plus" => SubscriptionTier::Plus,
            "connect" => SubscriptionTier::Connect,
            _ => SubscriptionTier::Free,
        }
    }

    /// Base monthly practitioner-interaction allowance for the tier.
    pub fn base_interaction_limit(&self) -> i32 {
        match self {
            SubscriptionTier::Connect => 4,
            _ => 0,
        }
    }

    /// Whether an upgrade path exists from this tier.
    pub fn can_upgrade(&self) -> bool {
        *self != SubscriptionTier::Connect
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local view of the provider subscription status.
///
/// The webhook handler mirrors the provider status string verbatim onto the
/// user row; this enum covers the statuses the rest of the system branches
/// on. Anything else is carried through as an opaque string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_round_trips_through_strings() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Plus,
            SubscriptionTier::Connect,
        ] {
            assert_eq!(SubscriptionTier::from_str_or_free(tier.as_str()), tier);
        }
    }

    #[test]
    fn unknown_tier_degrades_to_free() {
        assert_eq!(
            SubscriptionTier::from_str_or_free("enterprise"),
            SubscriptionTier::Free
        );
        assert_eq!(SubscriptionTier::from_str_or_free(""), SubscriptionTier::Free);
    }

    #[test]
    fn connect_gets_base_allowance_of_four() {
        assert_eq!(SubscriptionTier::Connect.base_interaction_limit(), 4);
        assert_eq!(SubscriptionTier::Plus.base_interaction_limit(), 0);
        assert_eq!(SubscriptionTier::Free.base_interaction_limit(), 0);
    }

    #[test]
    fn only_connect_cannot_upgrade() {
        assert!(SubscriptionTier::Free.can_upgrade());
        assert!(SubscriptionTier::Plus.can_upgrade());
        assert!(!SubscriptionTier::Connect.can_upgrade());
    }
}
