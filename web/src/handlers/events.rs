//! Event catalog endpoints.
//!
//! - `POST /api/v1/events`      create an event
//! - `GET  /api/v1/events`      list events
//! - `GET  /api/v1/events/:id`  event details with its `registered_count`

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use rollcall_core::error::RegistrationError;
use rollcall_core::types::{EventDetails, EventId, NewEvent};
use serde::{Deserialize, Serialize};

/// Request to create a new event.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Event name
    pub name: String,
    /// Event description
    #[serde(default)]
    pub description: String,
    /// Venue
    #[serde(default)]
    pub location: String,
    /// Date as given by the organizer
    #[serde(default)]
    pub date: String,
    /// Organizer identifier
    #[serde(default)]
    pub organizer_id: String,
    /// Spot count; defaults to 100
    pub total_spots: Option<i64>,
}

impl CreateEventRequest {
    fn into_new_event(self) -> Result<NewEvent, AppError> {
        let total_spots = match self.total_spots {
            None => NewEvent::DEFAULT_TOTAL_SPOTS,
            Some(spots) if spots <= 0 => {
                return Err(AppError::validation("Total spots must be greater than 0"));
            },
            Some(spots) => u32::try_from(spots)
                .map_err(|_| AppError::validation("Total spots is too large"))?,
        };

        let event = NewEvent {
            name: self.name,
            description: self.description,
            location: self.location,
            date: self.date,
            organizer_id: self.organizer_id,
            total_spots,
        };
        event.validate()?;
        Ok(event)
    }
}

/// Response for listing events.
#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    /// Events in creation order
    pub events: Vec<EventDetails>,
    /// Number of events returned
    pub total: usize,
}

/// Create a new event.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/events \
///   -H "Content-Type: application/json" \
///   -d '{"name":"RustConf","location":"Montreal","date":"2025-09-02","organizer_id":"org-1","total_spots":250}'
/// ```
///
/// # Errors
///
/// 400 for a blank name or a non-positive spot count, 503 if the catalog is down.
pub async fn create_event(
    State(state): State<AppState>,
    body: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventDetails>), AppError> {
    let Json(request) = body?;
    let event = request.into_new_event()?;

    let details = state
        .catalog
        .create_event(event)
        .await
        .map_err(RegistrationError::from)?;

    tracing::info!(
        event_id = %details.id,
        total_spots = details.total_spots,
        "Event created"
    );

    Ok((StatusCode::CREATED, Json(details)))
}

/// List all events.
///
/// # Errors
///
/// 503 if the catalog is down.
pub async fn list_events(
    State(state): State<AppState>,
) -> Result<Json<ListEventsResponse>, AppError> {
    let events = state
        .catalog
        .list_events()
        .await
        .map_err(RegistrationError::from)?;

    Ok(Json(ListEventsResponse {
        total: events.len(),
        events,
    }))
}

/// Get one event.
///
/// # Errors
///
/// 400 for a malformed id, 404 if the event does not exist.
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventDetails>, AppError> {
    let event_id = id.parse::<EventId>()?;

    state
        .catalog
        .get_event(event_id)
        .await
        .map_err(RegistrationError::from)?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Event", event_id))
}
