//! Registration processor: the authoritative apply half.
//!
//! [`RegistrationProcessor::apply`] hands one command to the capacity store,
//! which runs the capacity rules inside a single transaction. The processor
//! relies on the queue for exclusive ownership of the command's session; it
//! takes no lock of its own.

use crate::metrics::RegistrationMetrics;
use rollcall_core::capacity::{Outcome, SkipReason};
use rollcall_core::command::RegistrationCommand;
use rollcall_core::environment::Clock;
use rollcall_core::error::RegistrationError;
use rollcall_core::store::CapacityStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Applies commands to the capacity store.
#[derive(Clone)]
pub struct RegistrationProcessor {
    store: Arc<dyn CapacityStore>,
    clock: Arc<dyn Clock>,
}

impl RegistrationProcessor {
    /// Creates a new `RegistrationProcessor`
    #[must_use]
    pub fn new(store: Arc<dyn CapacityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply one command.
    ///
    /// Returns the outcome once it is committed. Duplicate and no-op outcomes
    /// are successes: the command must still be acknowledged.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::Transient`] if the store failed in a way that may
    ///   pass. Nothing was committed and the command must be left for
    ///   redelivery.
    /// - [`RegistrationError::Validation`] if the store turned the command
    ///   down for good. Its submission marker is withdrawn and the command
    ///   must be completed, not redelivered.
    pub async fn apply(&self, command: &RegistrationCommand) -> Result<Outcome, RegistrationError> {
        let started = Instant::now();

        let outcome = match self.store.apply(command, self.clock.now()).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => {
                RegistrationMetrics::record_apply_failure();
                warn!(
                    event_id = %command.event_id,
                    user_id = %command.user_id,
                    kind = %command.kind,
                    idempotency_key = %command.idempotency_key,
                    error = %e,
                    "Failed to apply registration command"
                );
                return Err(RegistrationError::Transient(e.to_string()));
            },
            Err(e) => {
                RegistrationMetrics::record_apply_failure();
                error!(
                    event_id = %command.event_id,
                    user_id = %command.user_id,
                    kind = %command.kind,
                    idempotency_key = %command.idempotency_key,
                    error = %e,
                    "Registration command cannot be applied"
                );
                if let Err(withdraw) = self.store.withdraw_submission(&command.idempotency_key).await {
                    warn!(
                        idempotency_key = %command.idempotency_key,
                        error = %withdraw,
                        "Failed to withdraw submission marker"
                    );
                }
                return Err(RegistrationError::Validation(e.to_string()));
            },
        };

        RegistrationMetrics::record_outcome(outcome, started.elapsed());

        match outcome {
            Outcome::Applied(_) | Outcome::Skipped(SkipReason::EventFull) => info!(
                event_id = %command.event_id,
                user_id = %command.user_id,
                kind = %command.kind,
                outcome = %outcome,
                "Registration command applied"
            ),
            Outcome::Skipped(SkipReason::UnknownEvent) => warn!(
                event_id = %command.event_id,
                user_id = %command.user_id,
                "Dropped registration command for unknown event"
            ),
            Outcome::Skipped(_) => debug!(
                event_id = %command.event_id,
                user_id = %command.user_id,
                kind = %command.kind,
                outcome = %outcome,
                "Registration command skipped"
            ),
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for RegistrationProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationProcessor").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rollcall_core::capacity::AppliedChange;
    use rollcall_core::types::{CommandKind, EventId, UserId};
    use rollcall_testing::{InMemoryRegistrationStore, test_clock};
    use std::time::Duration;

    fn command(event_id: EventId, user: &str, kind: CommandKind) -> RegistrationCommand {
        RegistrationCommand::derived(
            event_id,
            UserId::new(user).unwrap(),
            kind,
            test_clock().now(),
            Duration::from_secs(60),
        )
    }

    fn processor(store: &InMemoryRegistrationStore) -> RegistrationProcessor {
        RegistrationProcessor::new(Arc::new(store.clone()), Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn redelivered_register_counts_once() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(5);
        let processor = processor(&store);
        let register = command(event, "u1", CommandKind::Register);

        let first = processor.apply(&register).await.unwrap();
        let second = processor.apply(&register).await.unwrap();

        assert_eq!(first, Outcome::Applied(AppliedChange::Registered));
        assert_eq!(second, Outcome::Skipped(SkipReason::Duplicate));
        assert_eq!(store.registered_count(event), Some(1));
    }

    #[tokio::test]
    async fn unregister_of_stranger_is_noop() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(5);

        let outcome = processor(&store)
            .apply(&command(event, "nobody", CommandKind::Unregister))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotRegistered));
        assert_eq!(store.registered_count(event), Some(0));
    }

    #[tokio::test]
    async fn store_failure_is_transient() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(5);
        store.fail_next_applies(1);

        let err = processor(&store)
            .apply(&command(event, "u1", CommandKind::Register))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.registered_count(event), Some(0));
    }

    #[tokio::test]
    async fn rejected_apply_is_final_and_withdraws_marker() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(5);
        let register = command(event, "u1", CommandKind::Register);
        store.record_submission(&register).await.unwrap();
        store.reject_next_applies(1);

        let err = processor(&store).apply(&register).await.unwrap_err();

        assert!(matches!(err, RegistrationError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(store.outstanding_total(), 0);
        assert_eq!(store.registered_count(event), Some(0));
    }
}
