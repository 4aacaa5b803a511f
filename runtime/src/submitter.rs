//! Registration request submitter: the synchronous admission half.
//!
//! The submitter checks the cheap preconditions, builds an immutable
//! [`RegistrationCommand`] and enqueues it under the event's session. It never
//! claims or releases a spot; fullness is only decided when the processor
//! applies the command, because that is the only point with serialized,
//! authoritative state.
//!
//! ```text
//! submit ─► event exists? ──no──► NotFound(Event)
//!             │
//!             ├─ Unregister: Registered row or pending Register? ──no──► NotFound(Registration)
//!             ▼
//!         record marker ─► enqueue ──err──► withdraw marker if written here ─► Transient
//!             │
//!             ▼
//!          Accepted (202)
//! ```

use crate::metrics::RegistrationMetrics;
use chrono::{DateTime, Utc};
use rollcall_core::command::{IdempotencyKey, RegistrationCommand};
use rollcall_core::environment::Clock;
use rollcall_core::error::RegistrationError;
use rollcall_core::queue::CommandQueue;
use rollcall_core::store::{CapacityStore, EventCatalog};
use rollcall_core::types::{CommandKind, EventId, RegistrationStatus, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default width of the idempotency time bucket.
pub const DEFAULT_IDEMPOTENCY_BUCKET: Duration = Duration::from_secs(60);

/// A register or unregister request from the API layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitRequest {
    /// Event to register for
    pub event_id: EventId,
    /// Requesting user
    pub user_id: UserId,
    /// Register or unregister
    pub kind: CommandKind,
    /// Caller-supplied nonce; when absent the key is derived from the time bucket
    pub nonce: Option<String>,
}

impl SubmitRequest {
    /// Register request with a derived idempotency key
    #[must_use]
    pub const fn register(event_id: EventId, user_id: UserId) -> Self {
        Self {
            event_id,
            user_id,
            kind: CommandKind::Register,
            nonce: None,
        }
    }

    /// Unregister request with a derived idempotency key
    #[must_use]
    pub const fn unregister(event_id: EventId, user_id: UserId) -> Self {
        Self {
            event_id,
            user_id,
            kind: CommandKind::Unregister,
            nonce: None,
        }
    }

    /// Use a caller-supplied nonce for the idempotency key
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}

/// Receipt for an enqueued command. The outcome is not known yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accepted {
    /// Event the command targets
    pub event_id: EventId,
    /// User the command is for
    pub user_id: UserId,
    /// Register or unregister
    pub kind: CommandKind,
    /// Key the processor will use to detect redelivery
    pub idempotency_key: IdempotencyKey,
    /// When the command was accepted
    pub submitted_at: DateTime<Utc>,
}

impl Accepted {
    /// Human-readable acknowledgement
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self.kind {
            CommandKind::Register => "Registration request submitted",
            CommandKind::Unregister => "Unregistration request submitted",
        }
    }
}

/// Validates requests and enqueues registration commands.
#[derive(Clone)]
pub struct RegistrationSubmitter {
    catalog: Arc<dyn EventCatalog>,
    store: Arc<dyn CapacityStore>,
    queue: Arc<dyn CommandQueue>,
    clock: Arc<dyn Clock>,
    bucket: Duration,
}

impl RegistrationSubmitter {
    /// Creates a new `RegistrationSubmitter` with the default idempotency bucket
    #[must_use]
    pub fn new(
        catalog: Arc<dyn EventCatalog>,
        store: Arc<dyn CapacityStore>,
        queue: Arc<dyn CommandQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            store,
            queue,
            clock,
            bucket: DEFAULT_IDEMPOTENCY_BUCKET,
        }
    }

    /// Set the width of the idempotency time bucket
    #[must_use]
    pub const fn with_idempotency_bucket(mut self, bucket: Duration) -> Self {
        self.bucket = bucket;
        self
    }

    /// Admit a request and enqueue exactly one command for it.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the event does not exist, or for an
    ///   unregister when the user holds no spot and has no pending register
    /// - [`RegistrationError::Validation`] if the nonce is malformed
    /// - [`RegistrationError::Transient`] if the store or queue is unavailable;
    ///   nothing was enqueued and the caller may retry
    pub async fn submit(&self, request: SubmitRequest) -> Result<Accepted, RegistrationError> {
        let kind = request.kind;
        let result = self.admit(request).await;

        let label = match &result {
            Ok(_) => "accepted",
            Err(RegistrationError::NotFound { .. }) => "not_found",
            Err(RegistrationError::Validation(_)) => "invalid",
            Err(_) => "transient",
        };
        RegistrationMetrics::record_submission(kind, label);

        result
    }

    async fn admit(&self, request: SubmitRequest) -> Result<Accepted, RegistrationError> {
        let SubmitRequest {
            event_id,
            user_id,
            kind,
            nonce,
        } = request;

        let Some(total_spots) = self.catalog.total_spots(event_id).await? else {
            debug!(%event_id, %user_id, %kind, "Rejected submission for unknown event");
            return Err(RegistrationError::event_not_found(event_id));
        };
        debug!(%event_id, %user_id, %kind, total_spots, "Admitting submission");

        if kind == CommandKind::Unregister && !self.holds_or_awaits_spot(event_id, &user_id).await? {
            debug!(%event_id, %user_id, "Rejected unregister without registration");
            return Err(RegistrationError::registration_not_found(format!(
                "{event_id}/{user_id}"
            )));
        }

        let submitted_at = self.clock.now();
        let command = match nonce {
            Some(nonce) => {
                let key = IdempotencyKey::from_nonce(&event_id, &user_id, kind, &nonce)?;
                RegistrationCommand::new(event_id, user_id, kind, key, submitted_at)
            },
            None => RegistrationCommand::derived(event_id, user_id, kind, submitted_at, self.bucket),
        };

        let recorded = self.store.record_submission(&command).await?;

        if let Err(e) = self.queue.enqueue(&command).await {
            warn!(
                event_id = %command.event_id,
                user_id = %command.user_id,
                idempotency_key = %command.idempotency_key,
                error = %e,
                "Failed to enqueue registration command"
            );
            // An existing marker belongs to an earlier enqueued submission.
            if !recorded {
                return Err(e.into());
            }
            if let Err(withdraw) = self.store.withdraw_submission(&command.idempotency_key).await {
                warn!(
                    idempotency_key = %command.idempotency_key,
                    error = %withdraw,
                    "Failed to withdraw submission marker"
                );
            }
            return Err(e.into());
        }

        info!(
            event_id = %command.event_id,
            user_id = %command.user_id,
            kind = %command.kind,
            idempotency_key = %command.idempotency_key,
            "Registration command enqueued"
        );

        Ok(Accepted {
            event_id: command.event_id,
            user_id: command.user_id,
            kind: command.kind,
            idempotency_key: command.idempotency_key,
            submitted_at,
        })
    }

    /// A `Registered` row, or a register accepted but not applied yet.
    async fn holds_or_awaits_spot(
        &self,
        event_id: EventId,
        user_id: &UserId,
    ) -> Result<bool, RegistrationError> {
        let registered = self
            .store
            .registration(event_id, user_id)
            .await?
            .is_some_and(|r| r.status == RegistrationStatus::Registered);
        if registered {
            return Ok(true);
        }

        let outstanding = self.store.outstanding_submissions(event_id, user_id).await?;
        Ok(outstanding.contains(&CommandKind::Register))
    }
}

impl std::fmt::Debug for RegistrationSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationSubmitter")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
