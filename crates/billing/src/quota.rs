//! Interaction quota tracking
//!
//! Enforces the monthly practitioner-interaction ceiling for Connect users.
//! Consumption is a single guarded atomic increment at the storage layer so
//! concurrent callers can never lose an update or overshoot the limit.

use daybook_shared::SubscriptionTier;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Upper bound on mutations committed per reset batch. Matches the atomic
/// batch-write limit of the original document store.
pub const RESET_BATCH_SIZE: i64 = 400;

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub current: i32,
    pub limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i32>,
}

impl ConsumeResult {
    fn consumed(current: i32, limit: i32) -> Self {
        Self {
            success: true,
            reason: None,
            current,
            limit,
            remaining: Some(limit - current),
        }
    }

    fn limit_reached(current: i32, limit: i32) -> Self {
        Self {
            success: false,
            reason: Some("interaction_limit_reached"),
            current,
            limit,
            remaining: None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    subscription_tier: String,
    interactions_this_month: i32,
    interactions_limit: i32,
}

/// Tracker over the quota fields of the `users` table.
#[derive(Clone)]
pub struct QuotaTracker {
    pool: PgPool,
}

impl QuotaTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Consume one interaction. Only valid for Connect users.
    ///
    /// The guard and the increment are one statement: the `WHERE` clause
    /// re-checks `current < limit` at commit time, so two racing callers at
    /// the boundary resolve to exactly one success.
    pub async fn consume(&self, user_id: Uuid) -> BillingResult<ConsumeResult> {
        let row: Option<QuotaRow> = sqlx::query_as(
            r#"
            SELECT subscription_tier, interactions_this_month, interactions_limit
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(BillingError::UserNotFound(user_id))?;
        if SubscriptionTier::from_str_or_free(&row.subscription_tier) != SubscriptionTier::Connect
        {
            return Err(BillingError::PermissionDenied(
                "must be on Connect tier".to_string(),
            ));
        }

        let updated: Option<(i32, i32)> = sqlx::query_as(
            r#"
            UPDATE users
            SET interactions_this_month = interactions_this_month + 1,
                updated_at = NOW()
            WHERE id = $1
              AND subscription_tier = 'connect'
              AND interactions_this_month < interactions_limit
            RETURNING interactions_this_month, interactions_limit
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((current, limit)) => {
                tracing::debug!(user_id = %user_id, current, limit, "Interaction consumed");
                Ok(ConsumeResult::consumed(current, limit))
            }
            None => Ok(ConsumeResult::limit_reached(
                row.interactions_this_month,
                row.interactions_limit,
            )),
        }
    }

    /// Monthly reset of the quota block for every Connect user.
    ///
    /// Walks the Connect population by keyset and commits at most
    /// [`RESET_BATCH_SIZE`] row updates per batch. Mid-cycle extra purchases
    /// are discarded: purchases are per cycle, not cumulative.
    pub async fn reset_monthly(&self) -> BillingResult<u64> {
        let base_limit = SubscriptionTier::Connect.base_interaction_limit();
        let mut last_id: Option<Uuid> = None;
        let mut total: u64 = 0;

        loop {
            let ids: Vec<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM users
                WHERE subscription_tier = 'connect'
                  AND ($1::uuid IS NULL OR id > $1)
                ORDER BY id
                LIMIT $2
                "#,
            )
            .bind(last_id)
            .bind(RESET_BATCH_SIZE)
            .fetch_all(&self.pool)
            .await?;

            if ids.is_empty() {
                break;
            }
            last_id = ids.last().map(|(id,)| *id);
            let batch: Vec<Uuid> = ids.into_iter().map(|(id,)| id).collect();
            let batch_len = batch.len();

            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                UPDATE users
                SET interactions_this_month = 0,
                    extra_interactions_purchased = 0,
                    interactions_limit = $2,
                    updated_at = NOW()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&batch)
            .bind(base_limit)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            total += batch_len as u64;
            if (batch_len as i64) < RESET_BATCH_SIZE {
                break;
            }
        }

        tracing::info!(reset_count = total, "Monthly interaction counters reset");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_matches_store_limit() {
        assert_eq!(RESET_BATCH_SIZE, 400);
    }

    #[test]
    fn consumed_result_reports_remaining() {
        let r = ConsumeResult::consumed(3, 4);
        assert!(r.success);
        assert_eq!(r.remaining, Some(1));
        assert!(r.reason.is_none());
    }

    #[test]
    fn limit_reached_result_carries_reason_and_counts() {
        let r = ConsumeResult::limit_reached(4, 4);
        assert!(!r.success);
        assert_eq!(r.reason, Some("interaction_limit_reached"));
        assert_eq!((r.current, r.limit), (4, 4));
        assert!(r.remaining.is_none());
    }
}
