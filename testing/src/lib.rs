//! # Rollcall Testing
//!
//! Testing utilities for the registration coordinator.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - An in-memory session queue and capacity store with fault injection
//! - A Given-When-Then harness for the capacity rules
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_testing::{InMemoryCommandQueue, InMemoryRegistrationStore, test_clock};
//!
//! #[tokio::test]
//! async fn test_register_flow() {
//!     let store = InMemoryRegistrationStore::new();
//!     let queue = InMemoryCommandQueue::new();
//!     let event_id = store.insert_event(2);
//!
//!     submitter.submit(request).await.unwrap();
//!     worker.drain().await;
//!
//!     assert_eq!(store.registered_count(event_id), Some(1));
//! }
//! ```

use chrono::{DateTime, Utc};
use rollcall_core::environment::Clock;

pub mod queue;
pub mod store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making idempotency keys reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rollcall_testing::mocks::FixedClock;
    /// use rollcall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can hand one to the submitter and
    /// advance it from outside.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a new manual clock starting at the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities
///
/// Strategies producing registration workloads for proptest.
pub mod properties {
    use proptest::prelude::*;
    use rollcall_core::types::CommandKind;

    /// One step of a generated workload: which user does what.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct WorkloadStep {
        /// Index into a pool of users
        pub user: usize,
        /// Register or unregister
        pub kind: CommandKind,
    }

    /// Strategy for a command kind, biased towards registering
    pub fn command_kind() -> impl Strategy<Value = CommandKind> {
        prop_oneof![
            3 => Just(CommandKind::Register),
            1 => Just(CommandKind::Unregister),
        ]
    }

    /// Strategy for a workload over `users` users of up to `max_len` steps
    pub fn workload(users: usize, max_len: usize) -> impl Strategy<Value = Vec<WorkloadStep>> {
        prop::collection::vec(
            (0..users.max(1), command_kind()).prop_map(|(user, kind)| WorkloadStep { user, kind }),
            0..=max_len,
        )
    }
}

// Re-export commonly used items
pub use capacity_test::CapacityTest;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use queue::InMemoryCommandQueue;
pub use store::InMemoryRegistrationStore;
