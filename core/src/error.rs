//! Error taxonomy of the registration coordinator.
//!
//! Only `Validation`, `NotFound` and `Transient` ever reach a caller
//! synchronously. `CapacityExceeded` and `DuplicateCommand` describe
//! apply-time outcomes that surface through the status read path.

use crate::queue::QueueError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors produced by the registration coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Malformed input (surfaced as 400)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown event or registration (surfaced as 404)
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource that was missing
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Queue or store unavailable; safe to retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The event had no free spot when the command was applied
    #[error("Event {0} is full")]
    CapacityExceeded(String),

    /// The command was already applied (redelivery)
    #[error("Duplicate command: {0}")]
    DuplicateCommand(String),
}

impl RegistrationError {
    /// Shorthand for a missing event.
    #[must_use]
    pub fn event_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            resource: "Event",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing registration.
    #[must_use]
    pub fn registration_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            resource: "Registration",
            id: id.to_string(),
        }
    }

    /// Whether the caller (or the transport) may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(msg) => Self::Validation(msg),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<QueueError> for RegistrationError {
    fn from(err: QueueError) -> Self {
        Self::Transient(err.to_string())
    }
}
