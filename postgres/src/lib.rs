//! `PostgreSQL` backend for the registration coordinator.
//!
//! # Overview
//!
//! [`PostgresRegistrationStore`] implements both
//! [`CapacityStore`](rollcall_core::store::CapacityStore) and
//! [`EventCatalog`](rollcall_core::store::EventCatalog) on one database:
//!
//! ```text
//! events                      event_registrations          registration_submissions
//! ┌──────────────────────┐    ┌───────────────────────┐    ┌──────────────────────┐
//! │ id (PK)              │◄───│ event_id, user_id (PK)│    │ idempotency_key (PK) │
//! │ total_spots          │    │ status                │    │ event_id, user_id    │
//! │ registered_count     │    │ last_applied_key      │    │ kind                 │
//! │ ...metadata          │    │ rejection             │    │ submitted_at         │
//! └──────────────────────┘    └───────────────────────┘    └──────────────────────┘
//! ```
//!
//! `applied_commands` holds the idempotency key of every command applied to a
//! pair. `apply` checks it before running the capacity rules, so a command
//! the broker replays after later commands of the same pair stays a no-op.
//!
//! `registered_count <= total_spots` is enforced by a `CHECK` constraint as
//! well as by the capacity rules, so a bug elsewhere surfaces as a failed
//! transaction instead of an oversold event.
//!
//! # Transactions
//!
//! Each `apply` runs in one transaction that starts with
//! `SELECT ... FOR UPDATE` on the event row. Concurrent applies for the same
//! event therefore serialize on that row lock even if two processors ever
//! held commands of the same event.
//!
//! # Example
//!
//! ```ignore
//! use rollcall_postgres::{PoolSettings, PostgresRegistrationStore};
//!
//! let store = PostgresRegistrationStore::connect(&database_url, &PoolSettings::default()).await?;
//! store.migrate().await?;
//! ```

mod catalog;
mod store;

pub use store::{PoolSettings, PostgresRegistrationStore};
