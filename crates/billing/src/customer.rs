//! Stripe customer management

use sqlx::PgPool;
use stripe::{CreateCustomer, Customer};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Service for resolving users to Stripe customers.
#[derive(Clone)]
pub struct CustomerService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CustomerService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Resolve the user's Stripe customer id, creating the customer lazily
    /// on first use and persisting the mapping.
    ///
    /// Two concurrent first checkouts can each create a provider customer;
    /// the guarded update keeps whichever id lands first and the spare is a
    /// harmless orphan on the provider side.
    pub async fn get_or_create(&self, user_id: Uuid) -> BillingResult<String> {
        let row: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT stripe_customer_id, email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let (existing, email) = row.ok_or(BillingError::UserNotFound(user_id))?;
        if let Some(customer_id) = existing {
            return Ok(customer_id);
        }

        let mut params = CreateCustomer::new();
        params.email = Some(&email);
        params.metadata = Some(std::collections::HashMap::from([(
            "user_id".to_string(),
            user_id.to_string(),
        )]));

        let customer = Customer::create(self.stripe.inner(), params).await?;
        let customer_id = customer.id.to_string();

        sqlx::query(
            r#"
            UPDATE users
            SET stripe_customer_id = $2, updated_at = NOW()
            WHERE id = $1 AND stripe_customer_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(&customer_id)
        .execute(&self.pool)
        .await?;

        // Re-read in case a concurrent call won the write.
        let (stored,): (Option<String>,) =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let stored = stored.unwrap_or(customer_id);
        tracing::info!(user_id = %user_id, customer_id = %stored, "Stripe customer resolved");
        Ok(stored)
    }
}
