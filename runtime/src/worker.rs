//! Long-lived processor worker with automatic resubscription.
//!
//! A [`ProcessorWorker`] runs the subscribe-process-reconnect loop around a
//! [`RegistrationProcessor`]:
//!
//! ```text
//! loop {
//!     subscribe:
//!         loop {
//!             next delivery:
//!                 - apply
//!                 - Ok  => complete
//!                 - Err, retryable => back off, abandon (redelivered before later commands)
//!                 - Err, final     => count as poison, complete
//!                 - check shutdown signal
//!         }
//!         if stream ended or subscribe failed:
//!             wait and resubscribe
//! }
//! ```
//!
//! Several workers may share one queue. The queue's session lock guarantees
//! that no two of them hold commands of the same event at once, so adding
//! workers raises throughput across events without touching per-event order.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, _) = broadcast::channel(1);
//!
//! let handle = ProcessorWorker::new("processor-0", processor, queue, shutdown_tx.subscribe())
//!     .with_retry_policy(RetryPolicy::default())
//!     .spawn();
//!
//! // Later
//! shutdown_tx.send(())?;
//! handle.await?;
//! ```

use crate::metrics::RegistrationMetrics;
use crate::processor::RegistrationProcessor;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use rollcall_core::queue::{CommandQueue, Delivery, DeliveryStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Why [`ProcessorWorker::process_stream`] returned.
enum StreamEnd {
    Shutdown,
    Ended,
}

/// Worker applying deliveries from a command queue.
///
/// # Lifecycle
///
/// 1. Created via `new()`
/// 2. Spawned as background task via `spawn()`
/// 3. Runs until a shutdown signal is received; a delivery already being
///    applied is settled first
pub struct ProcessorWorker {
    /// Worker name (for logging)
    name: String,

    /// Applies each delivered command
    processor: Arc<RegistrationProcessor>,

    /// Queue to consume from
    queue: Arc<dyn CommandQueue>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Backoff before abandoning a failed delivery, by delivery count
    retry_policy: RetryPolicy,

    /// Delay before resubscribing (default: 5 seconds)
    reconnect_delay: Duration,
}

impl ProcessorWorker {
    /// Create a new worker.
    ///
    /// # Arguments
    ///
    /// * `name` - Worker name for logging (e.g., "processor-0")
    /// * `processor` - Processor applying commands
    /// * `queue` - Queue to subscribe to
    /// * `shutdown` - Broadcast receiver for graceful shutdown
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        processor: Arc<RegistrationProcessor>,
        queue: Arc<dyn CommandQueue>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            processor,
            queue,
            shutdown,
            retry_policy: RetryPolicy::default(),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Set the backoff applied before abandoning a failed delivery.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the delay before resubscribing after the stream ends or fails.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Spawn the worker as a background task.
    ///
    /// The returned handle completes after a shutdown signal was received.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(worker = %self.name, "Processor worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(worker = %self.name, "Processor worker received shutdown signal");
                    break;
                }
                subscribe_result = self.queue.subscribe() => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(worker = %self.name, "Subscribed to command queue");
                            RegistrationMetrics::record_worker_active(true);
                            let end = self.process_stream(&mut stream).await;
                            RegistrationMetrics::record_worker_active(false);

                            if matches!(end, StreamEnd::Shutdown) {
                                break;
                            }
                            warn!(
                                worker = %self.name,
                                delay_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                                "Delivery stream ended, resubscribing"
                            );
                        }
                        Err(e) => {
                            error!(
                                worker = %self.name,
                                error = %e,
                                delay_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                                "Failed to subscribe to command queue"
                            );
                        }
                    }

                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        () = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        info!(worker = %self.name, "Processor worker stopped");
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(worker = %self.name, "Processor worker received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                        Some(Err(e)) => {
                            RegistrationMetrics::record_poison_message();
                            error!(worker = %self.name, error = %e, "Skipped undeliverable queue message");
                        }
                        None => return StreamEnd::Ended,
                    }
                }
            }
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        if delivery.is_redelivery() {
            RegistrationMetrics::record_redelivery();
        }

        match self.processor.apply(delivery.command()).await {
            Ok(_) => {
                if let Err(e) = delivery.complete().await {
                    // The command is applied; a redelivery will be skipped as a duplicate.
                    warn!(worker = %self.name, error = %e, "Failed to complete delivery");
                }
            },
            Err(e) if !e.is_retryable() => {
                RegistrationMetrics::record_poison_message();
                error!(
                    worker = %self.name,
                    event_id = %delivery.command().event_id,
                    user_id = %delivery.command().user_id,
                    idempotency_key = %delivery.command().idempotency_key,
                    error = %e,
                    "Dropping command that cannot be applied"
                );
                if let Err(e) = delivery.complete().await {
                    warn!(worker = %self.name, error = %e, "Failed to complete delivery");
                }
            },
            Err(e) => {
                let attempt = usize::try_from(delivery.delivery_count().saturating_sub(1))
                    .unwrap_or(usize::MAX);
                let delay = self.retry_policy.delay_for_attempt(attempt);
                warn!(
                    worker = %self.name,
                    event_id = %delivery.command().event_id,
                    delivery_count = delivery.delivery_count(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Abandoning delivery for redelivery"
                );
                tokio::time::sleep(delay).await;
                if let Err(e) = delivery.abandon().await {
                    error!(worker = %self.name, error = %e, "Failed to abandon delivery");
                }
            },
        }
    }
}

impl std::fmt::Debug for ProcessorWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorWorker")
            .field("name", &self.name)
            .field("retry_policy", &self.retry_policy)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}
