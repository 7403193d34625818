#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Daybook Shared Types
//!
//! Domain types and database plumbing shared by the API server, the billing
//! crate, and the background worker.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{SubscriptionStatus, SubscriptionTier};
