//! Status reconciler: the eventual read path.
//!
//! Callers that submitted a command poll [`StatusReconciler::get_status`]
//! until it stops reporting `Pending`. The read has no side effects.

use chrono::{DateTime, Utc};
use rollcall_core::error::RegistrationError;
use rollcall_core::store::{CapacityStore, EventCatalog};
use rollcall_core::types::{EventId, Registration, RegistrationStatus, Rejection, UserId};
use serde::Serialize;
use std::sync::Arc;

/// Registration status of one `(event, user)` pair as seen by a poller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Event ID
    pub event_id: EventId,
    /// User ID
    pub user_id: UserId,
    /// `Pending` while an accepted command is not applied, else the stored status
    pub status: RegistrationStatus,
    /// Set when the last register was turned down (only when not pending)
    pub rejection: Option<Rejection>,
    /// When the stored row last changed; `None` if no command was ever applied
    pub last_updated: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Whether the status will not change without a new submission
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.status != RegistrationStatus::Pending
    }

    fn from_row(row: Option<Registration>, event_id: EventId, user_id: UserId) -> Self {
        match row {
            Some(row) => Self {
                event_id,
                user_id,
                status: row.status,
                rejection: row.rejection,
                last_updated: Some(row.last_updated),
            },
            None => Self {
                event_id,
                user_id,
                status: RegistrationStatus::Unregistered,
                rejection: None,
                last_updated: None,
            },
        }
    }
}

/// Reads registration status for pollers.
#[derive(Clone)]
pub struct StatusReconciler {
    catalog: Arc<dyn EventCatalog>,
    store: Arc<dyn CapacityStore>,
}

impl StatusReconciler {
    /// Creates a new `StatusReconciler`
    #[must_use]
    pub fn new(catalog: Arc<dyn EventCatalog>, store: Arc<dyn CapacityStore>) -> Self {
        Self { catalog, store }
    }

    /// Current status of a pair.
    ///
    /// A pair no command was ever applied to reports `Unregistered`.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the event does not exist
    /// - [`RegistrationError::Transient`] if the store is unavailable
    pub async fn get_status(
        &self,
        event_id: EventId,
        user_id: &UserId,
    ) -> Result<StatusReport, RegistrationError> {
        if !self.catalog.exists(event_id).await? {
            return Err(RegistrationError::event_not_found(event_id));
        }

        let row = self.store.registration(event_id, user_id).await?;
        let outstanding = self.store.outstanding_submissions(event_id, user_id).await?;

        let mut report = StatusReport::from_row(row, event_id, user_id.clone());
        if !outstanding.is_empty() {
            report.status = RegistrationStatus::Pending;
            report.rejection = None;
        }

        tracing::debug!(
            %event_id,
            %user_id,
            status = %report.status,
            outstanding = outstanding.len(),
            "Read registration status"
        );

        Ok(report)
    }
}

impl std::fmt::Debug for StatusReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReconciler").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rollcall_core::command::RegistrationCommand;
    use rollcall_core::environment::Clock;
    use rollcall_core::types::CommandKind;
    use rollcall_testing::{InMemoryRegistrationStore, test_clock};
    use std::time::Duration;

    fn reconciler(store: &InMemoryRegistrationStore) -> StatusReconciler {
        StatusReconciler::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    fn register(event_id: EventId, user: &UserId) -> RegistrationCommand {
        RegistrationCommand::derived(
            event_id,
            user.clone(),
            CommandKind::Register,
            test_clock().now(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn untouched_pair_is_unregistered() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(1);
        let user = UserId::new("u1").unwrap();

        let report = reconciler(&store).get_status(event, &user).await.unwrap();

        assert_eq!(report.status, RegistrationStatus::Unregistered);
        assert_eq!(report.last_updated, None);
        assert!(report.is_settled());
    }

    #[tokio::test]
    async fn accepted_command_reads_pending_until_applied() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(1);
        let user = UserId::new("u1").unwrap();
        let command = register(event, &user);
        store.record_submission(&command).await.unwrap();

        let pending = reconciler(&store).get_status(event, &user).await.unwrap();
        assert_eq!(pending.status, RegistrationStatus::Pending);

        store.apply(&command, test_clock().now()).await.unwrap();
        let settled = reconciler(&store).get_status(event, &user).await.unwrap();
        assert_eq!(settled.status, RegistrationStatus::Registered);
        assert_eq!(settled.last_updated, Some(test_clock().now()));
    }

    #[tokio::test]
    async fn full_event_reads_rejection() {
        let store = InMemoryRegistrationStore::new();
        let event = store.insert_event(1);
        let first = UserId::new("u1").unwrap();
        let second = UserId::new("u2").unwrap();
        store.apply(&register(event, &first), test_clock().now()).await.unwrap();
        store.apply(&register(event, &second), test_clock().now()).await.unwrap();

        let report = reconciler(&store).get_status(event, &second).await.unwrap();

        assert_eq!(report.status, RegistrationStatus::Unregistered);
        assert_eq!(report.rejection, Some(Rejection::EventFull));
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let store = InMemoryRegistrationStore::new();

        let err = reconciler(&store)
            .get_status(EventId::new(), &UserId::new("u1").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::NotFound { resource: "Event", .. }));
    }
}
