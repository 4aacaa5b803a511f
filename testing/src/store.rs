//! In-memory capacity store and event catalog.
//!
//! [`InMemoryRegistrationStore`] implements both [`CapacityStore`] and
//! [`EventCatalog`] over one mutex-guarded state, so each `apply` is atomic
//! the same way a database transaction would be. Fault injection lets tests
//! exercise the redelivery path.

use chrono::{DateTime, Utc};
use rollcall_core::capacity::{CapacityReducer, Outcome, RegistrationState, SkipReason};
use rollcall_core::command::{IdempotencyKey, RegistrationCommand};
use rollcall_core::store::{CapacityStore, EventCatalog, StoreError, StoreFuture};
use rollcall_core::types::{CommandKind, EventDetails, EventId, NewEvent, Registration, UserId};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Most recent applies kept for [`InMemoryRegistrationStore::applied`].
pub const APPLY_LOG_LIMIT: usize = 1024;

#[derive(Clone, Debug)]
struct Submission {
    key: IdempotencyKey,
    event_id: EventId,
    user_id: UserId,
    kind: CommandKind,
}

#[derive(Debug, Default)]
struct StoreState {
    events: HashMap<EventId, EventDetails>,
    event_order: Vec<EventId>,
    registrations: HashMap<(EventId, UserId), Registration>,
    applied_keys: HashMap<(EventId, UserId), BTreeSet<String>>,
    submissions: Vec<Submission>,
    applied: VecDeque<(RegistrationCommand, Outcome)>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<StoreState>,
    fail_applies: AtomicUsize,
    reject_applies: AtomicUsize,
    fail_submissions: AtomicUsize,
    unavailable: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory capacity store and catalog for tests.
///
/// Cloning yields another handle to the same data.
///
/// # Example
///
/// ```ignore
/// use rollcall_testing::InMemoryRegistrationStore;
///
/// let store = InMemoryRegistrationStore::new();
/// let event_id = store.insert_event(2);
///
/// let outcome = store.apply(&command, Utc::now()).await?;
/// assert_eq!(store.registered_count(event_id), Some(1));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    shared: Arc<Shared>,
    reducer: CapacityReducer,
}

impl InMemoryRegistrationStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event with `total_spots` spots and return its id
    #[must_use]
    pub fn insert_event(&self, total_spots: u32) -> EventId {
        let id = EventId::new();
        let details = EventDetails::from_new(
            id,
            NewEvent {
                name: format!("Event {id}"),
                description: String::new(),
                location: String::new(),
                date: String::new(),
                organizer_id: "organizer".to_string(),
                total_spots,
            },
        );
        let mut state = self.shared.lock();
        state.events.insert(id, details);
        state.event_order.push(id);
        id
    }

    /// Remove an event from the catalog (its rows stay)
    pub fn remove_event(&self, event_id: EventId) {
        let mut state = self.shared.lock();
        state.events.remove(&event_id);
        state.event_order.retain(|id| *id != event_id);
    }

    /// Make the next `count` apply calls fail before touching any state
    pub fn fail_next_applies(&self, count: usize) {
        self.shared.fail_applies.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` apply calls fail with an error that retrying
    /// cannot fix, before touching any state
    pub fn reject_next_applies(&self, count: usize) {
        self.shared.reject_applies.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` submission marker writes fail
    pub fn fail_next_submissions(&self, count: usize) {
        self.shared.fail_submissions.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads of any kind fail
    pub fn fail_next_reads(&self, count: usize) {
        self.shared.unavailable.store(count, Ordering::SeqCst);
    }

    /// Current registered count of an event
    #[must_use]
    pub fn registered_count(&self, event_id: EventId) -> Option<u32> {
        self.shared
            .lock()
            .events
            .get(&event_id)
            .map(|event| event.registered_count)
    }

    /// All stored rows of an event
    #[must_use]
    pub fn registrations_for(&self, event_id: EventId) -> Vec<Registration> {
        self.shared
            .lock()
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect()
    }

    /// The last [`APPLY_LOG_LIMIT`] commands applied with their outcomes, in
    /// apply order
    #[must_use]
    pub fn applied(&self) -> Vec<(RegistrationCommand, Outcome)> {
        self.shared.lock().applied.iter().cloned().collect()
    }

    /// Number of outstanding submission markers
    #[must_use]
    pub fn outstanding_total(&self) -> usize {
        self.shared.lock().submissions.len()
    }

    fn read_fault(&self) -> Result<(), StoreError> {
        if take_fault(&self.shared.unavailable) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn apply_now(
        &self,
        command: &RegistrationCommand,
        applied_at: DateTime<Utc>,
    ) -> Result<Outcome, StoreError> {
        if take_fault(&self.shared.fail_applies) {
            return Err(StoreError::Unavailable(
                "injected apply failure".to_string(),
            ));
        }
        if take_fault(&self.shared.reject_applies) {
            return Err(StoreError::Invalid("injected apply rejection".to_string()));
        }

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        state
            .submissions
            .retain(|s| s.key != command.idempotency_key);

        let outcome = match state.events.get_mut(&command.event_id) {
            None => Outcome::Skipped(SkipReason::UnknownEvent),
            Some(event) => {
                let pair = (command.event_id, command.user_id.clone());
                let registration = state.registrations.get(&pair).cloned().unwrap_or_else(|| {
                    Registration::unregistered(
                        command.event_id,
                        command.user_id.clone(),
                        applied_at,
                    )
                });
                let key = command.idempotency_key.as_str();
                let mut current = RegistrationState::new(event.capacity(), registration);
                if state.applied_keys.get(&pair).is_some_and(|keys| keys.contains(key)) {
                    current.applied_keys.insert(key.to_string());
                }

                let outcome = self.reducer.reduce(&mut current, command, applied_at);
                if outcome.writes_state() {
                    event.registered_count = current.capacity.registered_count;
                    state.registrations.insert(pair.clone(), current.registration);
                }
                if matches!(outcome, Outcome::Applied(_)) {
                    state
                        .applied_keys
                        .entry(pair)
                        .or_default()
                        .insert(key.to_string());
                }
                outcome
            },
        };

        if state.applied.len() == APPLY_LOG_LIMIT {
            state.applied.pop_front();
        }
        state.applied.push_back((command.clone(), outcome));
        Ok(outcome)
    }
}

impl CapacityStore for InMemoryRegistrationStore {
    fn record_submission<'a>(&'a self, command: &'a RegistrationCommand) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if take_fault(&self.shared.fail_submissions) {
                return Err(StoreError::Unavailable(
                    "injected submission failure".to_string(),
                ));
            }
            let mut state = self.shared.lock();
            if state
                .submissions
                .iter()
                .any(|s| s.key == command.idempotency_key)
            {
                return Ok(false);
            }
            state.submissions.push(Submission {
                key: command.idempotency_key.clone(),
                event_id: command.event_id,
                user_id: command.user_id.clone(),
                kind: command.kind,
            });
            Ok(true)
        })
    }

    fn withdraw_submission<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.shared.lock().submissions.retain(|s| &s.key != key);
            Ok(())
        })
    }

    fn apply<'a>(
        &'a self,
        command: &'a RegistrationCommand,
        applied_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Outcome> {
        Box::pin(async move { self.apply_now(command, applied_at) })
    }

    fn registration<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> StoreFuture<'a, Option<Registration>> {
        Box::pin(async move {
            self.read_fault()?;
            Ok(self
                .shared
                .lock()
                .registrations
                .get(&(event_id, user_id.clone()))
                .cloned())
        })
    }

    fn outstanding_submissions<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> StoreFuture<'a, Vec<CommandKind>> {
        Box::pin(async move {
            self.read_fault()?;
            Ok(self
                .shared
                .lock()
                .submissions
                .iter()
                .filter(|s| s.event_id == event_id && &s.user_id == user_id)
                .map(|s| s.kind)
                .collect())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.read_fault() })
    }
}

impl EventCatalog for InMemoryRegistrationStore {
    fn exists(&self, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.read_fault()?;
            Ok(self.shared.lock().events.contains_key(&event_id))
        })
    }

    fn total_spots(&self, event_id: EventId) -> StoreFuture<'_, Option<u32>> {
        Box::pin(async move {
            self.read_fault()?;
            Ok(self
                .shared
                .lock()
                .events
                .get(&event_id)
                .map(|event| event.total_spots))
        })
    }

    fn create_event(&self, event: NewEvent) -> StoreFuture<'_, EventDetails> {
        Box::pin(async move {
            event
                .validate()
                .map_err(|e| StoreError::Invalid(e.to_string()))?;
            let id = EventId::new();
            let details = EventDetails::from_new(id, event);
            let mut state = self.shared.lock();
            state.events.insert(id, details.clone());
            state.event_order.push(id);
            Ok(details)
        })
    }

    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Option<EventDetails>> {
        Box::pin(async move {
            self.read_fault()?;
            Ok(self.shared.lock().events.get(&event_id).cloned())
        })
    }

    fn list_events(&self) -> StoreFuture<'_, Vec<EventDetails>> {
        Box::pin(async move {
            self.read_fault()?;
            let state = self.shared.lock();
            Ok(state
                .event_order
                .iter()
                .filter_map(|id| state.events.get(id).cloned())
                .collect())
        })
    }
}
