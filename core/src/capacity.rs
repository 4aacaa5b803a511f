//! Capacity rules applied by the registration processor.
//!
//! This is the functional core of the coordinator. [`CapacityReducer::reduce`]
//! takes the authoritative state of one `(event, user)` pair, applies a single
//! command in place and reports what happened. It performs no I/O: store
//! implementations load [`RegistrationState`] inside their transaction, call
//! the reducer, and persist the state only when [`Outcome::writes_state`]
//! says so.
//!
//! ```text
//! key already applied to the pair ─────────────► Skipped(Duplicate)
//! Register   ─┬─ already Registered ───────────► Skipped(AlreadyRegistered)
//!             ├─ registered_count == total ────► Skipped(EventFull)   status=Unregistered
//!             └─ otherwise ────────────────────► Applied(Registered)  count+1
//! Unregister ─┬─ not Registered ───────────────► Skipped(NotRegistered)
//!             └─ otherwise ────────────────────► Applied(Unregistered) count-1
//! ```
//!
//! Only applied commands record their key. A register turned down as
//! `EventFull` can therefore be retried with the same key once a spot frees.

use crate::command::RegistrationCommand;
use crate::types::{CommandKind, EventCapacity, Registration, RegistrationStatus, Rejection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Authoritative state the processor reads and writes for one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationState {
    /// Capacity of the command's event
    pub capacity: EventCapacity,
    /// Row of the command's `(event, user)` pair (implicit default if absent)
    pub registration: Registration,
    /// Keys of commands already applied to the pair.
    ///
    /// Stores may load only the key of the command being applied; the
    /// reducer never looks at any other.
    pub applied_keys: BTreeSet<String>,
}

impl RegistrationState {
    /// State of a pair with no applied keys loaded
    #[must_use]
    pub const fn new(capacity: EventCapacity, registration: Registration) -> Self {
        Self {
            capacity,
            registration,
            applied_keys: BTreeSet::new(),
        }
    }

    /// Whether the state holds `key` as applied
    #[must_use]
    pub fn has_applied(&self, key: &str) -> bool {
        self.applied_keys.contains(key)
    }
}

/// Change made by an applied command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppliedChange {
    /// The user took a spot
    Registered,
    /// The user gave a spot back
    Unregistered,
}

/// Why a command changed nothing (or only recorded a rejection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// Same idempotency key as the last applied command (redelivery)
    Duplicate,
    /// Register for a user who already holds a spot
    AlreadyRegistered,
    /// Register while every spot is taken
    EventFull,
    /// Unregister for a user who holds no spot
    NotRegistered,
    /// The event no longer exists in the catalog
    UnknownEvent,
}

/// Result of applying one command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// State changed as requested
    Applied(AppliedChange),
    /// Nothing was claimed or released
    Skipped(SkipReason),
}

impl Outcome {
    /// Whether the reducer modified [`RegistrationState`] and it must be persisted.
    #[must_use]
    pub const fn writes_state(&self) -> bool {
        matches!(self, Self::Applied(_) | Self::Skipped(SkipReason::EventFull))
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied(AppliedChange::Registered) => "registered",
            Self::Applied(AppliedChange::Unregistered) => "unregistered",
            Self::Skipped(SkipReason::Duplicate) => "duplicate",
            Self::Skipped(SkipReason::AlreadyRegistered) => "already_registered",
            Self::Skipped(SkipReason::EventFull) => "event_full",
            Self::Skipped(SkipReason::NotRegistered) => "not_registered",
            Self::Skipped(SkipReason::UnknownEvent) => "unknown_event",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reducer enforcing the capacity invariant `0 <= registered_count <= total_spots`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapacityReducer;

impl CapacityReducer {
    /// Creates a new `CapacityReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Apply `command` to `state` in place.
    ///
    /// `state` must belong to the command's event and user. `applied_at`
    /// becomes the row's `last_updated` when the row changes.
    pub fn reduce(
        &self,
        state: &mut RegistrationState,
        command: &RegistrationCommand,
        applied_at: DateTime<Utc>,
    ) -> Outcome {
        let key = command.idempotency_key.as_str();
        if state.has_applied(key) {
            return Outcome::Skipped(SkipReason::Duplicate);
        }

        let registration = &mut state.registration;
        let capacity = &mut state.capacity;

        let outcome = match command.kind {
            CommandKind::Register => {
                if registration.status == RegistrationStatus::Registered {
                    return Outcome::Skipped(SkipReason::AlreadyRegistered);
                }

                if capacity.is_full() {
                    registration.status = RegistrationStatus::Unregistered;
                    registration.rejection = Some(Rejection::EventFull);
                    registration.last_updated = applied_at;
                    return Outcome::Skipped(SkipReason::EventFull);
                }

                capacity.registered_count += 1;
                registration.status = RegistrationStatus::Registered;
                AppliedChange::Registered
            },
            CommandKind::Unregister => {
                if registration.status != RegistrationStatus::Registered {
                    return Outcome::Skipped(SkipReason::NotRegistered);
                }

                capacity.registered_count = capacity.registered_count.saturating_sub(1);
                registration.status = RegistrationStatus::Unregistered;
                AppliedChange::Unregistered
            },
        };

        registration.rejection = None;
        registration.last_applied_key = Some(key.to_string());
        registration.last_updated = applied_at;
        state.applied_keys.insert(key.to_string());
        Outcome::Applied(outcome)
    }
}
