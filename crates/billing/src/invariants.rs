//! Entitlement Invariants Module
//!
//! Provides runnable consistency checks for the entitlement system.
//! These invariants can be run after any mutation or webhook replay to ensure
//! the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::checkout::MAX_EXTRA_INTERACTIONS;
use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - users may hold entitlements they did not pay for
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct QuotaOverrunRow {
    id: Uuid,
    interactions_this_month: i32,
    interactions_limit: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct ExtraOverCapRow {
    id: Uuid,
    extra_interactions_purchased: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct ZeroAllowanceRow {
    id: Uuid,
    interactions_limit: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct GiftOverRedeemedRow {
    code: String,
    created_by: Uuid,
    redemption_count: i32,
    max_uses: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct CanceledNotFreeRow {
    id: Uuid,
    subscription_tier: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidWithoutCustomerRow {
    id: Uuid,
    subscription_tier: String,
}

/// Service for running entitlement invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_quota_within_limit().await?);
        violations.extend(self.check_extra_purchases_capped().await?);
        violations.extend(self.check_connect_has_allowance().await?);
        violations.extend(self.check_gift_redemptions_capped().await?);
        violations.extend(self.check_canceled_users_are_free().await?);
        violations.extend(self.check_paid_tier_has_customer().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: usage never exceeds the limit
    ///
    /// The quota consume path re-checks `current < limit` at commit time, so
    /// any overrun means a write bypassed the guarded increment.
    async fn check_quota_within_limit(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<QuotaOverrunRow> = sqlx::query_as(
            r#"
            SELECT id, interactions_this_month, interactions_limit
            FROM users
            WHERE interactions_this_month > interactions_limit
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "quota_within_limit".to_string(),
                user_ids: vec![row.id],
                description: format!(
                    "User consumed {} interactions against a limit of {}",
                    row.interactions_this_month, row.interactions_limit
                ),
                context: serde_json::json!({
                    "interactions_this_month": row.interactions_this_month,
                    "interactions_limit": row.interactions_limit,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: extra purchases never exceed the per-cycle cap
    async fn check_extra_purchases_capped(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ExtraOverCapRow> = sqlx::query_as(
            r#"
            SELECT id, extra_interactions_purchased
            FROM users
            WHERE extra_interactions_purchased > $1
            "#,
        )
        .bind(MAX_EXTRA_INTERACTIONS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "extra_purchases_capped".to_string(),
                user_ids: vec![row.id],
                description: format!(
                    "User purchased {} extra interactions (cap is {})",
                    row.extra_interactions_purchased, MAX_EXTRA_INTERACTIONS
                ),
                context: serde_json::json!({
                    "extra_interactions_purchased": row.extra_interactions_purchased,
                    "cap": MAX_EXTRA_INTERACTIONS,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: active Connect users carry a positive allowance
    ///
    /// A Connect user with a zero limit would be paying for a tier whose
    /// defining feature they cannot use.
    async fn check_connect_has_allowance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ZeroAllowanceRow> = sqlx::query_as(
            r#"
            SELECT id, interactions_limit
            FROM users
            WHERE subscription_tier = 'connect'
              AND subscription_status = 'active'
              AND interactions_limit <= 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "connect_has_allowance".to_string(),
                user_ids: vec![row.id],
                description: format!(
                    "Active Connect user has interaction limit {}",
                    row.interactions_limit
                ),
                context: serde_json::json!({
                    "interactions_limit": row.interactions_limit,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: gift codes never collect more redemptions than max_uses
    async fn check_gift_redemptions_capped(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<GiftOverRedeemedRow> = sqlx::query_as(
            r#"
            SELECT code, created_by,
                   cardinality(redeemed_by)::INT AS redemption_count,
                   max_uses
            FROM gift_memberships
            WHERE cardinality(redeemed_by) > max_uses
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "gift_redemptions_capped".to_string(),
                user_ids: vec![row.created_by],
                description: format!(
                    "Gift code {} has {} redemptions against max_uses {}",
                    row.code, row.redemption_count, row.max_uses
                ),
                context: serde_json::json!({
                    "code": row.code,
                    "redemption_count": row.redemption_count,
                    "max_uses": row.max_uses,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: canceled users hold no paid tier
    async fn check_canceled_users_are_free(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CanceledNotFreeRow> = sqlx::query_as(
            r#"
            SELECT id, subscription_tier
            FROM users
            WHERE subscription_status = 'canceled'
              AND subscription_tier != 'free'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "canceled_users_are_free".to_string(),
                user_ids: vec![row.id],
                description: format!(
                    "Canceled user still holds tier '{}'",
                    row.subscription_tier
                ),
                context: serde_json::json!({
                    "subscription_tier": row.subscription_tier,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 6: paid tiers are backed by a provider customer
    async fn check_paid_tier_has_customer(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidWithoutCustomerRow> = sqlx::query_as(
            r#"
            SELECT id, subscription_tier
            FROM users
            WHERE subscription_tier IN ('plus', 'connect')
              AND subscription_status = 'active'
              AND stripe_customer_id IS NULL
              AND gifted_by IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_tier_has_customer".to_string(),
                user_ids: vec![row.id],
                description: format!(
                    "User on tier '{}' has no billing customer and was not gifted",
                    row.subscription_tier
                ),
                context: serde_json::json!({
                    "subscription_tier": row.subscription_tier,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single named check
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "quota_within_limit" => self.check_quota_within_limit().await,
            "extra_purchases_capped" => self.check_extra_purchases_capped().await,
            "connect_has_allowance" => self.check_connect_has_allowance().await,
            "gift_redemptions_capped" => self.check_gift_redemptions_capped().await,
            "canceled_users_are_free" => self.check_canceled_users_are_free().await,
            "paid_tier_has_customer" => self.check_paid_tier_has_customer().await,
            _ => Ok(vec![]),
        }
    }

    /// List of all available checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "quota_within_limit",
            "extra_purchases_capped",
            "connect_has_allowance",
            "gift_redemptions_capped",
            "canceled_users_are_free",
            "paid_tier_has_customer",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_display_is_uppercase() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn available_checks_are_unique() {
        let checks = InvariantChecker::available_checks();
        let unique: std::collections::HashSet<_> = checks.iter().collect();
        assert_eq!(checks.len(), unique.len());
        assert_eq!(checks.len(), 6);
    }
}
