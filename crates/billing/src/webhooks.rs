//! Stripe webhook handling
//!
//! Verifies provider signatures, claims events for exactly-once processing,
//! and translates each event into an entitlement change. Every state
//! transition the provider reports lands here; nothing else mutates
//! subscription fields.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Event, EventObject, EventType, Invoice, Subscription,
    Webhook,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::entitlement::EntitlementService;
use crate::error::{BillingError, BillingResult};
use crate::events::EntitlementEvent;
use crate::gifts::{GiftCodeService, RedeemOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Events stuck in `processing` longer than this are assumed crashed and may
/// be re-claimed by a later delivery.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Signature timestamp tolerance in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Parse a `t=...,v1=...` signature header into its timestamp and v1 digest.
fn parse_signature_header(signature: &str) -> Option<(i64, String)> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<String> = None;
    for part in signature.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1 = Some(value.to_string()),
            _ => {}
        }
    }
    Some((timestamp?, v1?))
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Tries the library verifier first, then falls back to manual signature
    /// verification for API versions the library does not recognize.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        let (timestamp, v1_signature) = parse_signature_header(signature).ok_or_else(|| {
            tracing::error!("Malformed webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!("System time error: {}", e);
                BillingError::WebhookSignatureInvalid
            })?
            .as_secs() as i64;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification passed"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    ///
    /// Claims exclusive processing rights with INSERT...ON CONFLICT...RETURNING
    /// so concurrent deliveries of the same event resolve to one processor.
    /// Events recorded as `error` may be re-claimed: the provider retries
    /// failed deliveries and a retry must be able to reprocess, not get
    /// swallowed by the duplicate check.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at
                       < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, already handled"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            // A row stuck in 'processing' will be re-claimed after the
            // timeout, so this is recoverable, but worth flagging.
            tracing::error!(
                event_id = %event_id,
                processing_result = %processing_result,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        result
    }

    async fn process_event(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }
            _ => {
                // Tracked so new event types that need handlers show up in logs.
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };

        let metadata = session.metadata.clone().unwrap_or_default();
        let user_id = user_id_from_metadata(&metadata)?;

        match session.mode {
            CheckoutSessionMode::Subscription => {
                self.activate_from_session(user_id, &session, &metadata)
                    .await
            }
            CheckoutSessionMode::Payment => {
                self.credit_extra_interactions(user_id, &session, &metadata)
                    .await
            }
            other => {
                tracing::info!(
                    user_id = %user_id,
                    session_id = %session.id,
                    mode = ?other,
                    "Checkout completed in unsupported mode, ignoring"
                );
                Ok(())
            }
        }
    }

    /// Subscription checkout: resolve the plan from the subscription's price,
    /// redeem any gift code, and grant the tier.
    async fn activate_from_session(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        let subscription_expandable = session.subscription.as_ref().ok_or_else(|| {
            BillingError::Internal("subscription checkout session has no subscription".to_string())
        })?;
        let subscription_id = subscription_expandable.id();
        let parsed_id = subscription_id.parse().map_err(|e| {
            BillingError::Internal(format!("invalid subscription id {subscription_id}: {e}"))
        })?;
        let subscription = Subscription::retrieve(self.stripe.inner(), &parsed_id, &[]).await?;

        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string())
            .ok_or_else(|| {
                BillingError::Internal(format!("subscription {subscription_id} has no price"))
            })?;

        // Unmapped price ids fail loudly. Granting a guessed tier for an
        // unrecognized price would silently hand out the wrong entitlement.
        let tier = self.stripe.config().price_ids.tier_for_price(&price_id)?;

        let customer_id = customer_id_from_session(session)?;

        // Redeem before activation so gifted_by is known; the guarded UPDATE
        // makes re-delivery a no-op rather than a double count.
        let mut gifted_by: Option<Uuid> = None;
        if let Some(code) = metadata.get("gift_code") {
            let gifts =
                GiftCodeService::new(self.pool.clone(), self.stripe.config().app_url.clone());
            match gifts.fetch(code).await? {
                Some(gift) => {
                    let outcome = gifts.redeem(code, user_id).await?;
                    match outcome {
                        RedeemOutcome::Redeemed | RedeemOutcome::AlreadyRedeemed => {
                            gifted_by = Some(gift.created_by);
                        }
                        RedeemOutcome::NotRedeemable => {
                            // Checkout already charged the discounted price;
                            // keep the activation and flag the code.
                            tracing::warn!(
                                user_id = %user_id,
                                gift_code = %code,
                                "Gift code no longer redeemable at webhook time"
                            );
                        }
                    }
                }
                None => {
                    tracing::warn!(
                        user_id = %user_id,
                        gift_code = %code,
                        "Gift code from checkout metadata not found"
                    );
                }
            }
        }

        let entitlements = EntitlementService::new(self.pool.clone());
        entitlements
            .apply_subscription_activation(
                user_id,
                tier,
                subscription.id.as_str(),
                &customer_id,
                gifted_by,
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            tier = %tier,
            gifted = gifted_by.is_some(),
            "Checkout completed, subscription activated"
        );

        Ok(())
    }

    /// One-time payment checkout: credit purchased extra interactions.
    async fn credit_extra_interactions(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        let quantity: i32 = match metadata.get("extra_interactions") {
            Some(raw) => raw.parse().map_err(|_| {
                BillingError::Internal(format!("invalid extra_interactions quantity: {raw}"))
            })?,
            None => {
                tracing::info!(
                    user_id = %user_id,
                    session_id = %session.id,
                    "Payment checkout without extra_interactions metadata, ignoring"
                );
                return Ok(());
            }
        };

        let entitlements = EntitlementService::new(self.pool.clone());
        entitlements
            .apply(
                user_id,
                &EntitlementEvent::ExtraInteractionsPurchased { quantity },
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            quantity = quantity,
            "Extra interactions credited"
        );

        Ok(())
    }

    /// Mirror the provider's status verbatim; the provider is the source of
    /// truth for subscription lifecycle.
    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;
        let user_id = user_id_from_metadata(&subscription.metadata)?;

        let status = subscription.status.as_str().to_string();
        let period_end = OffsetDateTime::from_unix_timestamp(subscription.current_period_end).ok();

        let entitlements = EntitlementService::new(self.pool.clone());
        entitlements
            .apply(
                user_id,
                &EntitlementEvent::StatusSynced {
                    status: status.clone(),
                    period_end,
                },
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = %status,
            "Subscription status synced"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;
        let user_id = user_id_from_metadata(&subscription.metadata)?;

        let entitlements = EntitlementService::new(self.pool.clone());
        entitlements.apply_cancellation(user_id).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Subscription deleted, downgraded to free tier"
        );

        Ok(())
    }

    /// Payment failure marks the user past_due but keeps the tier; the
    /// provider keeps retrying and a later `subscription.deleted` handles
    /// the terminal downgrade.
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;

        let user_id = match &invoice.subscription {
            Some(subscription_expandable) => {
                let subscription_id = subscription_expandable.id();
                let parsed_id = subscription_id.parse().map_err(|e| {
                    BillingError::Internal(format!(
                        "invalid subscription id {subscription_id}: {e}"
                    ))
                })?;
                let subscription =
                    Subscription::retrieve(self.stripe.inner(), &parsed_id, &[]).await?;
                user_id_from_metadata(&subscription.metadata)?
            }
            // One-time payment invoices carry no subscription; correlate by
            // customer instead.
            None => self.user_id_from_invoice_customer(&invoice).await?,
        };

        let entitlements = EntitlementService::new(self.pool.clone());
        entitlements.apply_payment_failure(user_id).await?;

        tracing::warn!(
            user_id = %user_id,
            invoice_id = %invoice.id,
            amount = invoice.amount_due,
            "Invoice payment failed, user marked past_due"
        );

        Ok(())
    }

    async fn user_id_from_invoice_customer(&self, invoice: &Invoice) -> BillingResult<Uuid> {
        let customer_id = match &invoice.customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => return Err(BillingError::Internal("No customer on invoice".to_string())),
        };

        let result: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE stripe_customer_id = $1")
                .bind(&customer_id)
                .fetch_optional(&self.pool)
                .await?;

        result
            .map(|(id,)| id)
            .ok_or_else(|| BillingError::Internal(format!("no user for customer {customer_id}")))
    }
}

fn extract_subscription(event: Event) -> BillingResult<Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Subscription".to_string(),
        )),
    }
}

fn extract_invoice(event: Event) -> BillingResult<Invoice> {
    match event.data.object {
        EventObject::Invoice(invoice) => Ok(invoice),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Invoice".to_string(),
        )),
    }
}

fn user_id_from_metadata(metadata: &HashMap<String, String>) -> BillingResult<Uuid> {
    metadata
        .get("user_id")
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| BillingError::Internal("user_id not found in metadata".to_string()))
}

fn customer_id_from_session(session: &CheckoutSession) -> BillingResult<String> {
    match &session.customer {
        Some(stripe::Expandable::Id(id)) => Ok(id.to_string()),
        Some(stripe::Expandable::Object(c)) => Ok(c.id.to_string()),
        None => Err(BillingError::Internal(
            "No customer on checkout session".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PriceIds, StripeConfig};
    use sqlx::postgres::PgPoolOptions;

    fn handler() -> WebhookHandler {
        // Lazy pool: signature verification never touches the database.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost:5432/daybook_test")
            .unwrap();
        let config = StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_testkey".to_string(),
            price_ids: PriceIds {
                plus_monthly: "price_plus_monthly".to_string(),
                connect_monthly: "price_connect_monthly".to_string(),
            },
            app_url: "http://localhost:3000".to_string(),
        };
        WebhookHandler::new(StripeClient::new(config), pool)
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn unix_now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected_despite_valid_hmac() {
        let handler = handler();
        let payload = r#"{"id":"evt_1","object":"event"}"#;
        // Well past the replay window, signed with the real key.
        let stale = unix_now() - SIGNATURE_TOLERANCE_SECS - 100;
        let digest = sign("testkey", stale, payload);
        let header = format!("t={},v1={}", stale, digest);

        let result = handler.verify_event(payload, &header);
        assert!(matches!(
            result,
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn fresh_timestamp_with_wrong_digest_is_rejected() {
        let handler = handler();
        let payload = r#"{"id":"evt_1","object":"event"}"#;
        let now = unix_now();
        let header = format!("t={},v1={}", now, "0".repeat(64));

        let result = handler.verify_event(payload, &header);
        assert!(matches!(
            result,
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn signature_header_parses_timestamp_and_v1() {
        let header = "t=1700000000,v1=abc123,v0=legacy";
        let (timestamp, v1) = parse_signature_header(header).unwrap();
        assert_eq!(timestamp, 1_700_000_000);
        assert_eq!(v1, "abc123");
    }

    #[test]
    fn signature_header_missing_parts_is_rejected() {
        assert!(parse_signature_header("t=1700000000").is_none());
        assert!(parse_signature_header("v1=abc123").is_none());
        assert!(parse_signature_header("garbage").is_none());
    }

    #[test]
    fn user_id_metadata_requires_valid_uuid() {
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), "not-a-uuid".to_string());
        assert!(user_id_from_metadata(&metadata).is_err());

        let id = Uuid::new_v4();
        metadata.insert("user_id".to_string(), id.to_string());
        assert_eq!(user_id_from_metadata(&metadata).unwrap(), id);
    }
}
