//! Event catalog on the `events` table.

use crate::store::{PostgresRegistrationStore, store_error, to_u32};
use rollcall_core::store::{EventCatalog, StoreError, StoreFuture};
use rollcall_core::types::{EventDetails, EventId, NewEvent};
use uuid::Uuid;

type EventRow = (Uuid, String, String, String, String, String, i32, i32);

const SELECT_EVENT: &str = r"SELECT id, name, description, location, date, organizer_id,
       total_spots, registered_count
FROM events";

fn details_from_row(row: EventRow) -> Result<EventDetails, StoreError> {
    let (id, name, description, location, date, organizer_id, total_spots, registered_count) = row;
    Ok(EventDetails {
        id: EventId::from_uuid(id),
        name,
        description,
        location,
        date,
        organizer_id,
        total_spots: to_u32("total_spots", total_spots)?,
        registered_count: to_u32("registered_count", registered_count)?,
    })
}

impl EventCatalog for PostgresRegistrationStore {
    fn exists(&self, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as(r"SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
                    .bind(*event_id.as_uuid())
                    .fetch_one(self.pool())
                    .await
                    .map_err(|e| store_error("check event", &e))?;
            Ok(exists)
        })
    }

    fn total_spots(&self, event_id: EventId) -> StoreFuture<'_, Option<u32>> {
        Box::pin(async move {
            let row: Option<(i32,)> = sqlx::query_as(r"SELECT total_spots FROM events WHERE id = $1")
                .bind(*event_id.as_uuid())
                .fetch_optional(self.pool())
                .await
                .map_err(|e| store_error("read total_spots", &e))?;
            row.map(|(spots,)| to_u32("total_spots", spots)).transpose()
        })
    }

    fn create_event(&self, event: NewEvent) -> StoreFuture<'_, EventDetails> {
        Box::pin(async move {
            event
                .validate()
                .map_err(|e| StoreError::Invalid(e.to_string()))?;
            let total_spots = i32::try_from(event.total_spots)
                .map_err(|_| StoreError::Invalid("total_spots out of range".to_string()))?;

            let details = EventDetails::from_new(EventId::new(), event);
            sqlx::query(
                r"INSERT INTO events
                      (id, name, description, location, date, organizer_id, total_spots, registered_count)
                  VALUES ($1, $2, $3, $4, $5, $6, $7, 0)",
            )
            .bind(*details.id.as_uuid())
            .bind(&details.name)
            .bind(&details.description)
            .bind(&details.location)
            .bind(&details.date)
            .bind(&details.organizer_id)
            .bind(total_spots)
            .execute(self.pool())
            .await
            .map_err(|e| store_error("create event", &e))?;

            tracing::info!(
                event_id = %details.id,
                total_spots = details.total_spots,
                "Created event"
            );
            Ok(details)
        })
    }

    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Option<EventDetails>> {
        Box::pin(async move {
            let query = format!("{SELECT_EVENT} WHERE id = $1");
            let row: Option<EventRow> = sqlx::query_as(&query)
                .bind(*event_id.as_uuid())
                .fetch_optional(self.pool())
                .await
                .map_err(|e| store_error("read event", &e))?;
            row.map(details_from_row).transpose()
        })
    }

    fn list_events(&self) -> StoreFuture<'_, Vec<EventDetails>> {
        Box::pin(async move {
            let query = format!("{SELECT_EVENT} ORDER BY created_at, id");
            let rows: Vec<EventRow> = sqlx::query_as(&query)
                .fetch_all(self.pool())
                .await
                .map_err(|e| store_error("list events", &e))?;
            rows.into_iter().map(details_from_row).collect()
        })
    }
}
