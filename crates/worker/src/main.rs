#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Daybook Background Worker
//!
//! Handles scheduled jobs:
//! - Monthly interaction quota reset (1st of the month, midnight US Eastern)
//! - Gift membership expiry sweep (daily at 3:00 AM UTC)
//! - Entitlement invariant checks (daily at 6:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use daybook_billing::{BillingService, ViolationSeverity};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Daybook Worker");

    let pool = create_db_pool().await?;

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // If Stripe isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            info!("Worker running without Stripe integration");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Monthly quota reset.
    // Cron: 05:00 UTC on the 1st, which is midnight US Eastern during DST
    // and 1am otherwise. Quotas are monthly, so the hour of drift is fine.
    let reset_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 5 1 * *", move |_uuid, _l| {
            let billing = reset_billing.clone();
            Box::pin(async move {
                info!("Running monthly interaction quota reset");
                match billing.quota.reset_monthly().await {
                    Ok(count) => info!(users_reset = count, "Monthly quota reset complete"),
                    Err(e) => error!(error = %e, "Monthly quota reset failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Monthly quota reset (1st of month, 05:00 UTC)");

    // Job 2: Gift membership expiry sweep (daily at 3:00 AM UTC)
    let expiry_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = expiry_billing.clone();
            Box::pin(async move {
                info!("Running gift membership expiry sweep");
                match billing.gifts.mark_expired().await {
                    Ok(count) => {
                        if count > 0 {
                            info!(expired = count, "Marked gift memberships expired");
                        }
                    }
                    Err(e) => error!(error = %e, "Gift expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Gift membership expiry sweep (daily at 3:00 AM UTC)");

    // Job 3: Entitlement invariant checks (daily at 6:00 AM UTC)
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 6 * * *", move |_uuid, _l| {
            let billing = invariant_billing.clone();
            Box::pin(async move {
                info!("Running entitlement invariant checks");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(
                            checks_run = summary.checks_run,
                            "All entitlement invariants hold"
                        );
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            let log_fields = (
                                violation.invariant.as_str(),
                                violation.user_ids.len(),
                                violation.description.as_str(),
                            );
                            match violation.severity {
                                ViolationSeverity::Critical | ViolationSeverity::High => {
                                    error!(
                                        invariant = log_fields.0,
                                        affected_users = log_fields.1,
                                        description = log_fields.2,
                                        "Entitlement invariant violated"
                                    );
                                }
                                _ => {
                                    warn!(
                                        invariant = log_fields.0,
                                        affected_users = log_fields.1,
                                        description = log_fields.2,
                                        "Entitlement invariant violated"
                                    );
                                }
                            }
                        }
                        warn!(
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Entitlement invariant check found violations"
                        );
                    }
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Entitlement invariant checks (daily at 6:00 AM UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Daybook Worker started successfully with 4 scheduled jobs");

    // Keep the main task running; the scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
