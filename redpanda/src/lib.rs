//! Redpanda session queue for registration commands.
//!
//! [`RedpandaCommandQueue`] implements [`CommandQueue`] on a Kafka-compatible
//! topic using rdkafka. Any Kafka-protocol broker works (Redpanda, Apache
//! Kafka, MSK).
//!
//! # Sessions on Partitions
//!
//! ```text
//! submitter ──enqueue──► topic "event-registration-commands"
//!                        ┌─────────────┬─────────────┬─────────────┐
//!   key = event id  ───► │ partition 0 │ partition 1 │ partition 2 │
//!                        └──────┬──────┴──────┬──────┴──────┬──────┘
//!                               ▼             ▼             ▼
//!                        consumer group "rollcall-registration-processor"
//!                        (one subscription per processor worker)
//! ```
//!
//! - **FIFO per session**: the record key is the event id, so every command
//!   of one event lands on one partition and is read back in order.
//! - **Session lock**: a partition belongs to one group member at a time, and
//!   a subscription hands out its next message only after the previous
//!   delivery is settled.
//! - **At-least-once**: offsets are committed manually when a delivery
//!   completes. An abandoned delivery is handed out again before the
//!   subscription reads further; a crash before commit makes the broker
//!   redeliver from the last committed offset.
//!
//! Undecodable payloads are committed and reported as `Err` items so they
//! never block their partition.
//!
//! # Example
//!
//! ```no_run
//! use rollcall_redpanda::RedpandaCommandQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaCommandQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("event-registration-commands")
//!     .consumer_group("rollcall-registration-processor")
//!     .build()?;
//! queue.ensure_topic().await?;
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rollcall_core::command::RegistrationCommand;
use rollcall_core::queue::{
    CommandQueue, Delivery, DeliveryStream, QueueError, QueueFuture, Settlement,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Default topic carrying registration commands.
pub const DEFAULT_TOPIC: &str = "event-registration-commands";

/// Default consumer group shared by processor workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "rollcall-registration-processor";

/// Redpanda-backed command queue.
///
/// The producer is shared; every [`CommandQueue::subscribe`] call creates its
/// own consumer in the configured group.
pub struct RedpandaCommandQueue {
    /// Producer for enqueueing commands
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Topic carrying commands
    topic: String,
    /// Consumer group ID
    consumer_group: String,
    /// Producer send timeout
    timeout: Duration,
    /// Where a group with no committed offset starts reading
    auto_offset_reset: String,
    /// Partition count used by [`Self::ensure_topic`]
    partitions: i32,
}

impl RedpandaCommandQueue {
    /// Create a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaCommandQueueBuilder {
        RedpandaCommandQueueBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic carrying commands.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Create the command topic if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if the admin request fails.
    pub async fn ensure_topic(&self) -> Result<(), QueueError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| QueueError::Unavailable(format!("Failed to create admin client: {e}")))?;

        let topic = NewTopic::new(&self.topic, self.partitions, TopicReplication::Fixed(1));
        let results = admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to create topic: {e}")))?;

        for result in results {
            match result {
                Ok(name) => {
                    tracing::info!(topic = %name, partitions = self.partitions, "Created command topic");
                },
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %name, "Command topic already exists");
                },
                Err((name, code)) => {
                    return Err(QueueError::Unavailable(format!(
                        "Failed to create topic '{name}': {code}"
                    )));
                },
            }
        }
        Ok(())
    }

    fn create_consumer(&self) -> Result<StreamConsumer, QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| QueueError::SubscriptionFailed(format!("Failed to create consumer: {e}")))?;

        consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
            QueueError::SubscriptionFailed(format!("Failed to subscribe to '{}': {e}", self.topic))
        })?;
        Ok(consumer)
    }
}

impl std::fmt::Debug for RedpandaCommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaCommandQueue")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaCommandQueue`].
#[derive(Default)]
pub struct RedpandaCommandQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    partitions: Option<i32>,
}

impl RedpandaCommandQueueBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the command topic (default: [`DEFAULT_TOPIC`]).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group (default: [`DEFAULT_CONSUMER_GROUP`]).
    ///
    /// All processor workers of a deployment must share one group so each
    /// partition has a single owner.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the producer acknowledgment mode: "1" or "all" (default: "all").
    ///
    /// Idempotence is only enabled with "all".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout (default: 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where a group with no committed offset starts (default: "earliest").
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the partition count used when creating the topic (default: 12).
    #[must_use]
    pub const fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Build the [`RedpandaCommandQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaCommandQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::Unavailable("Brokers not configured".to_string()))?;

        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        // Idempotent producer: broker-side dedup of retried sends, order kept per partition.
        let idempotence = if acks == "all" { "true" } else { "false" };
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .set("enable.idempotence", idempotence)
            .create()
            .map_err(|e| QueueError::Unavailable(format!("Failed to create producer: {e}")))?;

        let queue = RedpandaCommandQueue {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            partitions: self.partitions.unwrap_or(12),
        };

        tracing::info!(
            brokers = %queue.brokers,
            topic = %queue.topic,
            consumer_group = %queue.consumer_group,
            acks = %acks,
            "RedpandaCommandQueue created"
        );
        Ok(queue)
    }
}

impl CommandQueue for RedpandaCommandQueue {
    fn enqueue<'a>(&'a self, command: &'a RegistrationCommand) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let payload = command.encode()?;
            let session = command.session_key();

            let record = FutureRecord::to(&self.topic)
                .payload(&payload)
                .key(session.as_str());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        session = %session,
                        idempotency_key = %command.idempotency_key,
                        "Command enqueued"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        session = %session,
                        error = %kafka_error,
                        "Failed to enqueue command"
                    );
                    Err(QueueError::PublishFailed {
                        session,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(&self) -> QueueFuture<'_, DeliveryStream> {
        Box::pin(async move {
            let consumer = self.create_consumer()?;

            tracing::info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                manual_commit = true,
                "Subscribed to command topic"
            );

            // Capacity 1: the consumer task never runs ahead of the worker.
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(consume(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

/// Owns one consumer and forwards its messages one delivery at a time.
async fn consume(consumer: StreamConsumer, tx: mpsc::Sender<Result<Delivery, QueueError>>) {
    let mut messages = consumer.stream();

    loop {
        let next = tokio::select! {
            () = tx.closed() => break,
            next = messages.next() => next,
        };
        let Some(next) = next else { break };

        let message = match next {
            Ok(message) => message,
            Err(e) => {
                let err = QueueError::Unavailable(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            },
        };

        let decoded = message.payload().map_or_else(
            || Err(QueueError::Codec("Message has no payload".to_string())),
            RegistrationCommand::decode,
        );
        let command = match decoded {
            Ok(command) => command,
            Err(err) => {
                // Poison message: commit it so the partition moves on.
                commit(&consumer, &message);
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            },
        };

        if !hand_out(&consumer, &message, command, &tx).await {
            break;
        }
    }

    tracing::debug!("Consumer task exiting");
}

/// Deliver one command until it is completed. Returns `false` once the
/// subscriber is gone; the message then stays uncommitted.
async fn hand_out(
    consumer: &StreamConsumer,
    message: &BorrowedMessage<'_>,
    command: RegistrationCommand,
    tx: &mpsc::Sender<Result<Delivery, QueueError>>,
) -> bool {
    let mut delivery_count = 1;
    loop {
        let (verdict_tx, verdict_rx) = oneshot::channel();
        let delivery = Delivery::new(
            command.clone(),
            delivery_count,
            Box::new(RedpandaSettlement::new(verdict_tx)),
        );
        if tx.send(Ok(delivery)).await.is_err() {
            return false;
        }

        match verdict_rx.await {
            Ok(Verdict::Complete) => {
                commit(consumer, message);
                return true;
            },
            Ok(Verdict::Abandon) => {
                tracing::debug!(
                    partition = message.partition(),
                    offset = message.offset(),
                    delivery_count,
                    "Delivery abandoned, handing it out again"
                );
                delivery_count = delivery_count.saturating_add(1);
            },
            Err(_) => return false,
        }
    }
}

/// Synchronous commit: once this returns, a rebalance cannot resume before
/// the completed delivery. Earlier offsets replayed anyway apply as duplicates.
fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Sync) {
        tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Complete,
    Abandon,
}

/// Reports a worker's verdict back to the consumer task.
///
/// Dropping it unsettled reports `Abandon`.
struct RedpandaSettlement {
    verdict: Option<oneshot::Sender<Verdict>>,
}

impl RedpandaSettlement {
    const fn new(verdict: oneshot::Sender<Verdict>) -> Self {
        Self {
            verdict: Some(verdict),
        }
    }

    fn settle(&mut self, verdict: Verdict) -> Result<(), QueueError> {
        match self.verdict.take() {
            Some(tx) => tx
                .send(verdict)
                .map_err(|_| QueueError::SettlementFailed("Consumer task stopped".to_string())),
            None => Ok(()),
        }
    }
}

impl Settlement for RedpandaSettlement {
    fn complete(mut self: Box<Self>) -> QueueFuture<'static, ()> {
        let result = self.settle(Verdict::Complete);
        Box::pin(async move { result })
    }

    fn abandon(mut self: Box<Self>) -> QueueFuture<'static, ()> {
        let result = self.settle(Verdict::Abandon);
        Box::pin(async move { result })
    }
}

impl Drop for RedpandaSettlement {
    fn drop(&mut self) {
        if let Some(tx) = self.verdict.take() {
            let _ = tx.send(Verdict::Abandon);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_command_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaCommandQueue>();
        assert_sync::<RedpandaCommandQueue>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let err = RedpandaCommandQueue::builder().build().unwrap_err();
        assert!(matches!(err, QueueError::Unavailable(_)));
    }

    #[tokio::test]
    async fn complete_reports_complete() {
        let (tx, rx) = oneshot::channel();
        let settlement: Box<dyn Settlement> = Box::new(RedpandaSettlement::new(tx));

        settlement.complete().await.unwrap();

        assert_eq!(rx.await.unwrap(), Verdict::Complete);
    }

    #[tokio::test]
    async fn dropped_settlement_reports_abandon() {
        let (tx, rx) = oneshot::channel();
        drop(RedpandaSettlement::new(tx));

        assert_eq!(rx.await.unwrap(), Verdict::Abandon);
    }

    #[tokio::test]
    async fn settling_after_consumer_stopped_fails() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let settlement: Box<dyn Settlement> = Box::new(RedpandaSettlement::new(tx));

        let err = settlement.abandon().await.unwrap_err();
        assert!(matches!(err, QueueError::SettlementFailed(_)));
    }
}
