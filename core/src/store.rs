//! Capacity store and event catalog abstractions.
//!
//! The [`CapacityStore`] is the durable record of each event's registered
//! count and every `(event, user)` registration row. Only the processor
//! mutates counts and rows, through [`CapacityStore::apply`], which must run
//! the whole read-modify-write of one command as a single atomic transaction
//! (see [`CapacityReducer`](crate::capacity::CapacityReducer) for the rules).
//!
//! Outside of `apply`, the submitter only writes outstanding-submission
//! markers. They let the read path report `Pending` for a command that was
//! accepted but not yet applied; `apply` deletes the command's marker in the
//! same transaction that applies it.
//!
//! The [`EventCatalog`] owns event metadata and the fixed spot count.

use crate::capacity::Outcome;
use crate::command::{IdempotencyKey, RegistrationCommand};
use crate::types::{CommandKind, EventDetails, EventId, NewEvent, Registration, UserId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur in the capacity store or catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database unreachable or the operation timed out
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Input rejected by the store (constraint violation, bad value)
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Stored data could not be interpreted
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Concurrent transaction conflict; safe to retry
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether repeating the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}

/// Future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable keyed store for capacity and registration rows.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn CapacityStore>` across the submitter, workers and reconciler.
pub trait CapacityStore: Send + Sync {
    /// Record that `command` was accepted and is about to be enqueued.
    ///
    /// Returns `true` if a new marker was written and `false` if a marker
    /// with the same idempotency key was already outstanding. Only the
    /// caller that wrote a marker may withdraw it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the marker could not be written.
    fn record_submission<'a>(&'a self, command: &'a RegistrationCommand) -> StoreFuture<'a, bool>;

    /// Remove the marker of a submission whose enqueue failed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the marker could not be removed.
    fn withdraw_submission<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, ()>;

    /// Apply one command atomically and delete its submission marker.
    ///
    /// Loads the event's capacity (locking it against other transactions on
    /// the same event), the pair's row and whether the command's key was
    /// ever applied to the pair. Runs the capacity rules, persists the result
    /// when it changed anything, remembers the key of an applied command and
    /// commits. Nothing is persisted on error.
    ///
    /// Applied keys are kept for good, so a command replayed after later
    /// commands of the same pair is still skipped as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure. The caller must leave
    /// the command unacknowledged so it is redelivered.
    fn apply<'a>(
        &'a self,
        command: &'a RegistrationCommand,
        applied_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Outcome>;

    /// Stored row of a pair, `None` if no command was ever applied to it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn registration<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> StoreFuture<'a, Option<Registration>>;

    /// Kinds of the accepted commands for a pair that are not applied yet,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn outstanding_submissions<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> StoreFuture<'a, Vec<CommandKind>>;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if it is not.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Event metadata owned by the catalog.
pub trait EventCatalog: Send + Sync {
    /// Whether the event exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn exists(&self, event_id: EventId) -> StoreFuture<'_, bool>;

    /// Fixed spot count of an event, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn total_spots(&self, event_id: EventId) -> StoreFuture<'_, Option<u32>>;

    /// Create an event with nobody registered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if the event is rejected by the store.
    fn create_event(&self, event: NewEvent) -> StoreFuture<'_, EventDetails>;

    /// Look up one event with its current registered count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Option<EventDetails>>;

    /// All events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn list_events(&self) -> StoreFuture<'_, Vec<EventDetails>>;
}
