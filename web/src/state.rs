//! Application state for Axum handlers.

use rollcall_core::environment::Clock;
use rollcall_core::queue::CommandQueue;
use rollcall_core::store::{CapacityStore, EventCatalog};
use rollcall_runtime::{RegistrationSubmitter, StatusReconciler};
use std::sync::Arc;
use std::time::Duration;

/// Shared state for every handler: the submitter for writes, the reconciler
/// for status reads, and the catalog and store for events and readiness.
///
/// Cloning is cheap; all collaborators sit behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Admission path for register/unregister
    pub submitter: RegistrationSubmitter,
    /// Status read path
    pub reconciler: StatusReconciler,
    /// Event catalog
    pub catalog: Arc<dyn EventCatalog>,
    /// Capacity store (readiness check)
    pub store: Arc<dyn CapacityStore>,
}

impl AppState {
    /// Wire the submitter and reconciler from their collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn EventCatalog>,
        store: Arc<dyn CapacityStore>,
        queue: Arc<dyn CommandQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let submitter = RegistrationSubmitter::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            queue,
            clock,
        );
        let reconciler = StatusReconciler::new(Arc::clone(&catalog), Arc::clone(&store));

        Self {
            submitter,
            reconciler,
            catalog,
            store,
        }
    }

    /// Set the width of the idempotency time bucket used for keyless requests.
    #[must_use]
    pub fn with_idempotency_bucket(mut self, bucket: Duration) -> Self {
        self.submitter = self.submitter.with_idempotency_bucket(bucket);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("submitter", &self.submitter)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_testing::{InMemoryCommandQueue, InMemoryRegistrationStore, test_clock};

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_state_wires_shared_store() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let event_id = store.insert_event(3);
        let state = AppState::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryCommandQueue::new()),
            Arc::new(test_clock()),
        )
        .with_idempotency_bucket(Duration::from_secs(5));

        assert!(state.catalog.exists(event_id).await.is_ok_and(|exists| exists));
        assert!(state.store.ping().await.is_ok());
    }
}
