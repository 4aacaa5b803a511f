//! Session-ordered command queue abstraction.
//!
//! The [`CommandQueue`] trait carries [`RegistrationCommand`]s from the
//! submitter to the processor. Every command is tagged with a session key (its
//! event id) and implementations must uphold three guarantees:
//!
//! - **FIFO per session**: commands sharing a session key are delivered in
//!   enqueue order.
//! - **Session lock**: at most one consumer holds an unsettled delivery of a
//!   given session at any instant. The next command of that session is not
//!   handed out until the current one is completed or abandoned.
//! - **At-least-once**: a delivery that is abandoned, or dropped without being
//!   settled, is redelivered before any later command of its session.
//!
//! Across sessions there is no ordering guarantee, so different events are
//! processed concurrently.
//!
//! # Implementations
//!
//! - `InMemoryCommandQueue` (rollcall-testing): per-session deques with a lock set
//! - `RedpandaCommandQueue` (rollcall-redpanda): partition keyed by session,
//!   manual offset commits
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! queue.enqueue(&command).await?;
//!
//! let mut deliveries = queue.subscribe().await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     match apply(delivery.command()).await {
//!         Ok(_) => delivery.complete().await?,
//!         Err(_) => delivery.abandon().await?,
//!     }
//! }
//! ```

use crate::command::RegistrationCommand;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The transport cannot be reached
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Failed to publish a command to its session
    #[error("Publish failed for session '{session}': {reason}")]
    PublishFailed {
        /// Session key of the command
        session: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to open a subscription
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// A payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Completing or abandoning a delivery failed
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    /// The queue was shut down
    #[error("Queue closed")]
    Closed,
}

/// Future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Stream of deliveries from a subscription.
///
/// An `Err` item reports a message that could not be turned into a delivery
/// (for example an undecodable payload). Implementations settle such messages
/// themselves so they never block their session.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Transport-specific acknowledgement of one delivery.
///
/// Exactly one of the two methods is called per delivery. Implementations
/// must treat a settlement that is dropped unsettled as abandoned.
pub trait Settlement: Send + Sync {
    /// Acknowledge the delivery; it will not be redelivered.
    fn complete(self: Box<Self>) -> QueueFuture<'static, ()>;

    /// Release the delivery; it is redelivered before later commands of its
    /// session.
    fn abandon(self: Box<Self>) -> QueueFuture<'static, ()>;
}

/// A command handed to a consumer together with its settlement handle.
pub struct Delivery {
    command: RegistrationCommand,
    delivery_count: u32,
    settlement: Box<dyn Settlement>,
}

impl Delivery {
    /// Creates a new `Delivery`
    #[must_use]
    pub fn new(
        command: RegistrationCommand,
        delivery_count: u32,
        settlement: Box<dyn Settlement>,
    ) -> Self {
        Self {
            command,
            delivery_count,
            settlement,
        }
    }

    /// The delivered command
    #[must_use]
    pub const fn command(&self) -> &RegistrationCommand {
        &self.command
    }

    /// How many times this command has been handed out, starting at 1
    #[must_use]
    pub const fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Whether this is a redelivery
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the transport rejects the
    /// acknowledgement. The command may then be redelivered.
    pub async fn complete(self) -> Result<(), QueueError> {
        self.settlement.complete().await
    }

    /// Release the delivery for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the transport rejects the
    /// release.
    pub async fn abandon(self) -> Result<(), QueueError> {
        self.settlement.abandon().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("command", &self.command)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

/// Trait for session-ordered command queue implementations.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the queue can be shared as
/// `Arc<dyn CommandQueue>` between the submitter and the processor workers.
pub trait CommandQueue: Send + Sync {
    /// Append a command to its session (the command's event id).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] or [`QueueError::Unavailable`] if
    /// the command could not be durably enqueued.
    fn enqueue<'a>(&'a self, command: &'a RegistrationCommand) -> QueueFuture<'a, ()>;

    /// Open a subscription yielding deliveries across all sessions.
    ///
    /// Several subscriptions may be open at once (one per worker); the
    /// session lock is shared between them.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(&self) -> QueueFuture<'_, DeliveryStream>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CommandKind, EventId, UserId};
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;

    struct Recorder(Arc<AtomicU8>);

    impl Settlement for Recorder {
        fn complete(self: Box<Self>) -> QueueFuture<'static, ()> {
            self.0.store(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn abandon(self: Box<Self>) -> QueueFuture<'static, ()> {
            self.0.store(2, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn command() -> RegistrationCommand {
        RegistrationCommand::derived(
            EventId::new(),
            UserId::new("u1").unwrap(),
            CommandKind::Register,
            Utc::now(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn settlement_routes_through_the_handle() {
        let state = Arc::new(AtomicU8::new(0));
        let delivery = Delivery::new(command(), 1, Box::new(Recorder(Arc::clone(&state))));
        assert!(!delivery.is_redelivery());

        futures::executor::block_on(delivery.complete()).unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 1);

        let delivery = Delivery::new(command(), 2, Box::new(Recorder(Arc::clone(&state))));
        assert!(delivery.is_redelivery());
        futures::executor::block_on(delivery.abandon()).unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 2);
    }
}
