//! Gift membership codes
//!
//! Practitioner-issued discount codes toward a Connect subscription. Records
//! are append-only: redemption adds the user to `redeemed_by`, and codes are
//! never deleted so the audit trail survives expiry and exhaustion.

use rand::Rng;
use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Code alphabet. Excludes visually ambiguous characters (0/O, 1/I/L).
pub const GIFT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const GIFT_CODE_LENGTH: usize = 8;

/// Insert attempts before giving up on a free code. Collisions are already
/// vanishingly rare at 32^8; the retry closes the check-then-insert gap.
const MAX_GENERATION_ATTEMPTS: u32 = 5;

const DEFAULT_EXPIRATION_DAYS: i64 = 90;

/// Generate a candidate code. Uniqueness is enforced at insert time.
pub fn generate_gift_code<R: Rng>(rng: &mut R) -> String {
    (0..GIFT_CODE_LENGTH)
        .map(|_| GIFT_CODE_ALPHABET[rng.random_range(0..GIFT_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Clamp a requested discount into the allowed [0.50, 1.0] band.
pub fn clamp_discount(requested: f64) -> f64 {
    if requested.is_nan() {
        return 0.5;
    }
    requested.clamp(0.5, 1.0)
}

/// A stored gift membership record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GiftMembership {
    pub code: String,
    pub created_by: Uuid,
    pub created_by_email: String,
    pub discount_percent: f64,
    pub max_uses: i32,
    pub recipient_email: Option<String>,
    pub redeemed_by: Vec<Uuid>,
    pub expires_at: OffsetDateTime,
    pub status: String,
}

/// Why a code is not currently redeemable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftAvailability {
    Available,
    Expired,
    FullyRedeemed,
}

impl GiftMembership {
    /// Pure redeemability check: a code is usable iff it has not expired
    /// and has redemptions left.
    pub fn availability(&self, now: OffsetDateTime) -> GiftAvailability {
        if self.expires_at < now {
            GiftAvailability::Expired
        } else if self.redeemed_by.len() as i32 >= self.max_uses {
            GiftAvailability::FullyRedeemed
        } else {
            GiftAvailability::Available
        }
    }
}

/// Response of a validation lookup. Never mutates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<OffsetDateTime>,
}

impl GiftValidation {
    fn invalid(reason: &'static str) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            discount_percent: None,
            created_by_email: None,
            expires_at: None,
        }
    }
}

/// Result of creating a gift membership.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGift {
    pub gift_code: String,
    pub discount_percent: f64,
    pub expires_at: OffsetDateTime,
    pub redeem_url: String,
}

/// Outcome of a redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed,
    /// The user was already in `redeemed_by`; counting again would
    /// double-count a webhook re-delivery.
    AlreadyRedeemed,
    /// Expired or exhausted at commit time.
    NotRedeemable,
}

/// Registry over the `gift_memberships` table.
#[derive(Clone)]
pub struct GiftCodeService {
    pool: PgPool,
    app_url: String,
}

impl GiftCodeService {
    pub fn new(pool: PgPool, app_url: String) -> Self {
        Self { pool, app_url }
    }

    /// Create a gift membership. The issuer must be an approved
    /// practitioner; the discount is clamped to [0.50, 1.0].
    pub async fn create(
        &self,
        issuer_id: Uuid,
        discount_percent: f64,
        max_uses: i32,
        expiration_days: Option<i64>,
        recipient_email: Option<String>,
    ) -> BillingResult<CreatedGift> {
        let issuer_email: Option<(String,)> =
            sqlx::query_as("SELECT email FROM approved_practitioners WHERE user_id = $1")
                .bind(issuer_id)
                .fetch_optional(&self.pool)
                .await?;

        let issuer_email = issuer_email
            .map(|(email,)| email)
            .ok_or_else(|| {
                BillingError::PermissionDenied(
                    "only approved practitioners can create gift memberships".to_string(),
                )
            })?;

        if max_uses < 1 {
            return Err(BillingError::InvalidArgument(
                "maxUses must be at least 1".to_string(),
            ));
        }

        let discount = clamp_discount(discount_percent);
        let expires_at = OffsetDateTime::now_utc()
            + Duration::days(expiration_days.unwrap_or(DEFAULT_EXPIRATION_DAYS));

        // Check-then-insert with retry: the unique key on `code` detects a
        // collision, and we draw a fresh code rather than failing the call.
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let code = generate_gift_code(&mut rand::rng());
            let inserted = sqlx::query(
                r#"
                INSERT INTO gift_memberships
                    (code, created_by, created_by_email, discount_percent,
                     max_uses, recipient_email, expires_at, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'active')
                ON CONFLICT (code) DO NOTHING
                "#,
            )
            .bind(&code)
            .bind(issuer_id)
            .bind(&issuer_email)
            .bind(discount)
            .bind(max_uses)
            .bind(recipient_email.as_deref())
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                tracing::info!(
                    issuer_id = %issuer_id,
                    code = %code,
                    discount_percent = discount,
                    max_uses,
                    "Gift membership created"
                );
                return Ok(CreatedGift {
                    redeem_url: format!("{}/redeem?code={}", self.app_url, code),
                    gift_code: code,
                    discount_percent: discount,
                    expires_at,
                });
            }
            tracing::warn!(code = %code, "Gift code collision, regenerating");
        }

        Err(BillingError::Internal(
            "could not generate a unique gift code".to_string(),
        ))
    }

    /// Fetch a record by code (case-normalized). `None` when unknown.
    pub async fn fetch(&self, code: &str) -> BillingResult<Option<GiftMembership>> {
        let gift: Option<GiftMembership> = sqlx::query_as(
            r#"
            SELECT code, created_by, created_by_email, discount_percent,
                   max_uses, recipient_email, redeemed_by, expires_at, status
            FROM gift_memberships
            WHERE code = $1
            "#,
        )
        .bind(code.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(gift)
    }

    /// Validate a code without mutating it.
    pub async fn validate(&self, code: &str) -> BillingResult<GiftValidation> {
        let Some(gift) = self.fetch(code).await? else {
            return Ok(GiftValidation::invalid("Gift code not found"));
        };

        match gift.availability(OffsetDateTime::now_utc()) {
            GiftAvailability::Expired => Ok(GiftValidation::invalid("Gift code has expired")),
            GiftAvailability::FullyRedeemed => {
                Ok(GiftValidation::invalid("Gift code has been fully redeemed"))
            }
            GiftAvailability::Available => Ok(GiftValidation {
                valid: true,
                reason: None,
                discount_percent: Some(gift.discount_percent),
                created_by_email: Some(gift.created_by_email),
                expires_at: Some(gift.expires_at),
            }),
        }
    }

    /// Append a user to `redeemed_by`. Invoked from the subscription
    /// activation path only.
    ///
    /// The `WHERE` clause dedupes on the user id and re-checks the usage
    /// ceiling and expiry in the same statement, so concurrent redemptions
    /// at the boundary cannot overshoot `max_uses`.
    pub async fn redeem(&self, code: &str, user_id: Uuid) -> BillingResult<RedeemOutcome> {
        let code = code.to_uppercase();
        let updated = sqlx::query(
            r#"
            UPDATE gift_memberships
            SET redeemed_by = array_append(redeemed_by, $2),
                redeemed_at = NOW()
            WHERE code = $1
              AND NOT (redeemed_by @> ARRAY[$2]::uuid[])
              AND cardinality(redeemed_by) < max_uses
              AND expires_at >= NOW()
            "#,
        )
        .bind(&code)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            tracing::info!(code = %code, user_id = %user_id, "Gift code redeemed");
            return Ok(RedeemOutcome::Redeemed);
        }

        let gift = self.fetch(&code).await?.ok_or(BillingError::GiftCodeNotFound)?;
        if gift.redeemed_by.contains(&user_id) {
            Ok(RedeemOutcome::AlreadyRedeemed)
        } else {
            tracing::warn!(code = %code, user_id = %user_id, "Gift code no longer redeemable");
            Ok(RedeemOutcome::NotRedeemable)
        }
    }

    /// Flip past-expiry records to `expired`. Availability is always derived
    /// from `expires_at`, so this only keeps the stored status column honest
    /// for reporting. Returns the number of rows updated.
    pub async fn mark_expired(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            "UPDATE gift_memberships SET status = 'expired' WHERE expires_at < NOW() AND status = 'active'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
