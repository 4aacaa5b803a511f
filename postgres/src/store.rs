//! Capacity store: transactional apply, submission markers and reads.

use chrono::{DateTime, Utc};
use rollcall_core::capacity::{CapacityReducer, Outcome, RegistrationState, SkipReason};
use rollcall_core::command::{IdempotencyKey, RegistrationCommand};
use rollcall_core::store::{CapacityStore, StoreError, StoreFuture};
use rollcall_core::types::{
    CommandKind, EventCapacity, EventId, Registration, RegistrationStatus, Rejection, UserId,
};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions};
use std::time::Duration;

/// Connection pool settings.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Maximum open connections (default: 10)
    pub max_connections: u32,
    /// Connections kept open when idle (default: 1)
    pub min_connections: u32,
    /// How long to wait for a connection (default: 5 seconds)
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// PostgreSQL-backed capacity store and event catalog.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
    reducer: CapacityReducer,
}

impl PostgresRegistrationStore {
    /// Create a store on an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            reducer: CapacityReducer::new(),
        }
    }

    /// Connect to `database_url` with the given pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection fails.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = settings.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::from_pool(pool))
    }

    /// Create or upgrade the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_in_transaction(
        &self,
        command: &RegistrationCommand,
        applied_at: DateTime<Utc>,
    ) -> Result<Outcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", &e))?;

        let locked: Option<(i32, i32)> = sqlx::query_as(
            r"SELECT total_spots, registered_count
              FROM events
              WHERE id = $1
              FOR UPDATE",
        )
        .bind(*command.event_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_error("lock event", &e))?;

        let outcome = match locked {
            None => Outcome::Skipped(SkipReason::UnknownEvent),
            Some((total_spots, registered_count)) => {
                let capacity = EventCapacity {
                    event_id: command.event_id,
                    total_spots: to_u32("total_spots", total_spots)?,
                    registered_count: to_u32("registered_count", registered_count)?,
                };
                let registration =
                    fetch_registration(&mut *tx, command.event_id, &command.user_id)
                        .await?
                        .unwrap_or_else(|| {
                            Registration::unregistered(
                                command.event_id,
                                command.user_id.clone(),
                                applied_at,
                            )
                        });

                let mut state = RegistrationState::new(capacity, registration);
                if key_applied(&mut *tx, command).await? {
                    state
                        .applied_keys
                        .insert(command.idempotency_key.as_str().to_string());
                }

                let outcome = self.reducer.reduce(&mut state, command, applied_at);
                if outcome.writes_state() {
                    write_state(&mut tx, &state).await?;
                }
                if matches!(outcome, Outcome::Applied(_)) {
                    remember_key(&mut tx, command, applied_at).await?;
                }
                outcome
            },
        };

        sqlx::query(r"DELETE FROM registration_submissions WHERE idempotency_key = $1")
            .bind(command.idempotency_key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("delete submission", &e))?;

        tx.commit()
            .await
            .map_err(|e| store_error("commit", &e))?;

        Ok(outcome)
    }
}

impl std::fmt::Debug for PostgresRegistrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRegistrationStore")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

async fn write_state(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    state: &RegistrationState,
) -> Result<(), StoreError> {
    let registered_count = i32::try_from(state.capacity.registered_count)
        .map_err(|_| StoreError::Invalid("registered_count out of range".to_string()))?;

    sqlx::query(r"UPDATE events SET registered_count = $2 WHERE id = $1")
        .bind(*state.capacity.event_id.as_uuid())
        .bind(registered_count)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error("update registered_count", &e))?;

    let row = &state.registration;
    sqlx::query(
        r"INSERT INTO event_registrations
              (event_id, user_id, status, last_applied_key, rejection, last_updated)
          VALUES ($1, $2, $3, $4, $5, $6)
          ON CONFLICT (event_id, user_id) DO UPDATE
          SET status = EXCLUDED.status,
              last_applied_key = EXCLUDED.last_applied_key,
              rejection = EXCLUDED.rejection,
              last_updated = EXCLUDED.last_updated",
    )
    .bind(*row.event_id.as_uuid())
    .bind(row.user_id.as_str())
    .bind(row.status.as_str())
    .bind(row.last_applied_key.as_deref())
    .bind(row.rejection.map(|r| r.as_str()))
    .bind(row.last_updated)
    .execute(&mut **tx)
    .await
    .map_err(|e| store_error("upsert registration", &e))?;

    Ok(())
}

async fn key_applied<'e>(
    executor: impl PgExecutor<'e>,
    command: &RegistrationCommand,
) -> Result<bool, StoreError> {
    let (applied,): (bool,) = sqlx::query_as(
        r"SELECT EXISTS(
              SELECT 1 FROM applied_commands
              WHERE event_id = $1 AND user_id = $2 AND idempotency_key = $3)",
    )
    .bind(*command.event_id.as_uuid())
    .bind(command.user_id.as_str())
    .bind(command.idempotency_key.as_str())
    .fetch_one(executor)
    .await
    .map_err(|e| store_error("read applied key", &e))?;
    Ok(applied)
}

async fn remember_key(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    command: &RegistrationCommand,
    applied_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r"INSERT INTO applied_commands (event_id, user_id, idempotency_key, applied_at)
          VALUES ($1, $2, $3, $4)",
    )
    .bind(*command.event_id.as_uuid())
    .bind(command.user_id.as_str())
    .bind(command.idempotency_key.as_str())
    .bind(applied_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| store_error("record applied key", &e))?;
    Ok(())
}

async fn fetch_registration<'e>(
    executor: impl PgExecutor<'e>,
    event_id: EventId,
    user_id: &UserId,
) -> Result<Option<Registration>, StoreError> {
    let row: Option<(String, Option<String>, Option<String>, DateTime<Utc>)> = sqlx::query_as(
        r"SELECT status, last_applied_key, rejection, last_updated
          FROM event_registrations
          WHERE event_id = $1 AND user_id = $2",
    )
    .bind(*event_id.as_uuid())
    .bind(user_id.as_str())
    .fetch_optional(executor)
    .await
    .map_err(|e| store_error("read registration", &e))?;

    let Some((status, last_applied_key, rejection, last_updated)) = row else {
        return Ok(None);
    };

    let status =
        RegistrationStatus::parse(&status).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let rejection = rejection
        .as_deref()
        .map(Rejection::parse)
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(Some(Registration {
        event_id,
        user_id: user_id.clone(),
        status,
        last_applied_key,
        rejection,
        last_updated,
    }))
}

pub(crate) fn to_u32(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {value}")))
}

/// Map a sqlx error onto the store's error kinds.
pub(crate) fn store_error(operation: &str, error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => {
                metrics::counter!("registration_store_conflicts_total").increment(1);
                StoreError::Conflict(format!("{operation}: {db}"))
            },
            // integrity constraint violations
            Some(code) if code.starts_with("23") => {
                StoreError::Invalid(format!("{operation}: {db}"))
            },
            _ => StoreError::Unavailable(format!("{operation}: {db}")),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("{operation}: {error}"))
        },
        _ => StoreError::Unavailable(format!("{operation}: {error}")),
    }
}

impl CapacityStore for PostgresRegistrationStore {
    fn record_submission<'a>(&'a self, command: &'a RegistrationCommand) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"INSERT INTO registration_submissions
                      (idempotency_key, event_id, user_id, kind, submitted_at)
                  VALUES ($1, $2, $3, $4, $5)
                  ON CONFLICT (idempotency_key) DO NOTHING",
            )
            .bind(command.idempotency_key.as_str())
            .bind(*command.event_id.as_uuid())
            .bind(command.user_id.as_str())
            .bind(command.kind.as_str())
            .bind(command.submitted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("record submission", &e))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn withdraw_submission<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(r"DELETE FROM registration_submissions WHERE idempotency_key = $1")
                .bind(key.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("withdraw submission", &e))?;
            Ok(())
        })
    }

    fn apply<'a>(
        &'a self,
        command: &'a RegistrationCommand,
        applied_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Outcome> {
        Box::pin(self.apply_in_transaction(command, applied_at))
    }

    fn registration<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> StoreFuture<'a, Option<Registration>> {
        Box::pin(fetch_registration(&self.pool, event_id, user_id))
    }

    fn outstanding_submissions<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> StoreFuture<'a, Vec<CommandKind>> {
        Box::pin(async move {
            let kinds: Vec<(String,)> = sqlx::query_as(
                r"SELECT kind
                  FROM registration_submissions
                  WHERE event_id = $1 AND user_id = $2
                  ORDER BY recorded_at, submitted_at",
            )
            .bind(*event_id.as_uuid())
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("read submissions", &e))?;

            kinds
                .into_iter()
                .map(|(kind,)| {
                    CommandKind::parse(&kind).map_err(|e| StoreError::Corrupt(e.to_string()))
                })
                .collect()
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("ping", &e))?;
            Ok(())
        })
    }
}
