//! Connects the queue and store selected by the configuration.

use crate::config::{Backend, Config};
use anyhow::Context;
use rollcall_core::queue::CommandQueue;
use rollcall_core::store::{CapacityStore, EventCatalog};
use rollcall_postgres::{PoolSettings, PostgresRegistrationStore};
use rollcall_redpanda::RedpandaCommandQueue;
use rollcall_runtime::retry::{RetryPolicy, retry_with_backoff};
use rollcall_testing::{InMemoryCommandQueue, InMemoryRegistrationStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The three collaborators every other component is built from.
#[derive(Clone)]
pub struct Components {
    /// Event catalog
    pub catalog: Arc<dyn EventCatalog>,
    /// Capacity store
    pub store: Arc<dyn CapacityStore>,
    /// Session-ordered command queue
    pub queue: Arc<dyn CommandQueue>,
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components").finish_non_exhaustive()
    }
}

impl Components {
    /// Connect to the configured backend.
    ///
    /// For `postgres` this connects the pool, runs migrations and makes sure
    /// the command topic exists. Connecting and creating the topic are retried
    /// `STARTUP_RETRIES` times with the processor's backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or broker cannot be reached.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        match config.backend {
            Backend::Memory => Ok(Self::in_memory()),
            Backend::Postgres => Self::durable(config).await,
        }
    }

    /// Process-local queue and store.
    #[must_use]
    pub fn in_memory() -> Self {
        warn!("Using in-memory backend; registrations are lost on restart");
        let store = Arc::new(InMemoryRegistrationStore::new());
        Self {
            catalog: store.clone(),
            store,
            queue: Arc::new(InMemoryCommandQueue::new()),
        }
    }

    async fn durable(config: &Config) -> anyhow::Result<Self> {
        let settings = PoolSettings {
            max_connections: config.postgres.max_connections,
            min_connections: config.postgres.min_connections,
            acquire_timeout: Duration::from_secs(config.postgres.connect_timeout),
        };
        let policy = startup_retry_policy(config);
        let store = startup_step(&policy, "connect to PostgreSQL", || {
            PostgresRegistrationStore::connect(&config.postgres.url, &settings)
        })
        .await?;
        store
            .migrate()
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");

        let queue = RedpandaCommandQueue::builder()
            .brokers(&config.redpanda.brokers)
            .topic(&config.redpanda.topic)
            .consumer_group(&config.redpanda.consumer_group)
            .producer_acks(&config.redpanda.producer_acks)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .build()
            .context("Failed to create RedPanda producer")?;
        startup_step(&policy, "create the registration topic", || queue.ensure_topic()).await?;
        info!(
            brokers = %config.redpanda.brokers,
            topic = %config.redpanda.topic,
            "Command queue ready"
        );

        let store = Arc::new(store);
        Ok(Self {
            catalog: store.clone(),
            store,
            queue: Arc::new(queue),
        })
    }
}

/// Backoff for startup connections: the processor's delays, `STARTUP_RETRIES` retries.
#[must_use]
pub fn startup_retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(config.server.startup_retries)
        .initial_delay(config.processor.retry_initial())
        .max_delay(config.processor.retry_max())
        .build()
}

async fn startup_step<T, E, F, Fut>(policy: &RetryPolicy, what: &str, operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    retry_with_backoff(policy.clone(), operation)
        .await
        .with_context(|| format!("Failed to {what}"))
}
