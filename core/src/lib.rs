//! # Rollcall Core
//!
//! Domain types, capacity rules and collaborator traits for capacity-safe
//! event registration.
//!
//! Registration is a two-phase protocol: a cheap synchronous admission check
//! that enqueues a command, followed by an asynchronous authoritative apply.
//!
//! ```text
//! HTTP ──► Submitter ──enqueue──► CommandQueue (session = event id)
//!                                      │ FIFO per session, one holder at a time
//!                                      ▼
//!                                  Processor ──apply──► CapacityStore
//!                                                            ▲
//! HTTP ◄── Reconciler ───────────────read────────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! - **Command**: immutable register/unregister request with an idempotency key
//! - **Session key**: the event id; the queue serializes commands sharing it
//! - **Capacity invariant**: `0 <= registered_count <= total_spots`, maintained
//!   only by the processor
//! - **Outcome**: what applying a command did (`Applied` or `Skipped`)
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_core::capacity::{CapacityReducer, RegistrationState};
//!
//! let outcome = CapacityReducer::new().reduce(&mut state, &command, clock.now());
//! if outcome.writes_state() {
//!     persist(&state).await?;
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod capacity;
pub mod command;
pub mod error;
pub mod queue;
pub mod store;
pub mod types;

pub use capacity::{AppliedChange, CapacityReducer, Outcome, RegistrationState, SkipReason};
pub use command::{IdempotencyKey, RegistrationCommand};
pub use error::RegistrationError;
pub use queue::{CommandQueue, Delivery, DeliveryStream, QueueError, Settlement};
pub use store::{CapacityStore, EventCatalog, StoreError};
pub use types::{
    CommandKind, EventCapacity, EventDetails, EventId, NewEvent, Registration,
    RegistrationStatus, Rejection, UserId,
};

/// Environment module - Dependency injection traits
///
/// All external dependencies of the coordinator are abstracted behind traits
/// and injected at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic idempotency keys
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
