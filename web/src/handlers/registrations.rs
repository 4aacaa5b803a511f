//! Registration endpoints.
//!
//! - `POST   /api/v1/events/:id/register`                 enqueue a register command
//! - `DELETE /api/v1/events/:id/unregister`               enqueue an unregister command
//! - `GET    /api/v1/events/:id/registrations/:user_id`   poll the outcome
//!
//! Writes answer `202 Accepted` once the command is queued; the caller polls
//! the status endpoint until it stops reporting `Pending`.

use crate::error::AppError;
use crate::extractors::{CorrelationId, IdempotencyNonce};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rollcall_core::types::{EventId, UserId};
use rollcall_runtime::{Accepted, StatusReport, SubmitRequest};
use serde::{Deserialize, Serialize};

/// Body of a register or unregister request.
#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    /// User to register or unregister
    pub user_id: String,
}

/// Response for an accepted command.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    /// Human-readable acknowledgement
    pub message: &'static str,
    /// Key the command was queued under
    pub idempotency_key: String,
    /// When the command was accepted
    pub submitted_at: DateTime<Utc>,
}

impl From<Accepted> for AcceptedResponse {
    fn from(accepted: Accepted) -> Self {
        Self {
            message: accepted.message(),
            idempotency_key: accepted.idempotency_key.as_str().to_string(),
            submitted_at: accepted.submitted_at,
        }
    }
}

fn parse_ids(event_id: &str, user_id: String) -> Result<(EventId, UserId), AppError> {
    let event_id = event_id.parse::<EventId>()?;
    let user_id = UserId::new(user_id)?;
    Ok((event_id, user_id))
}

async fn submit(
    state: &AppState,
    request: SubmitRequest,
    nonce: Option<String>,
    correlation_id: CorrelationId,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let request = match nonce {
        Some(nonce) => request.with_nonce(nonce),
        None => request,
    };

    let accepted = state.submitter.submit(request).await.inspect_err(|e| {
        tracing::debug!(
            correlation_id = %correlation_id.0,
            error = %e,
            "Submission refused"
        );
    })?;

    tracing::info!(
        correlation_id = %correlation_id.0,
        event_id = %accepted.event_id,
        user_id = %accepted.user_id,
        kind = %accepted.kind,
        idempotency_key = %accepted.idempotency_key.as_str(),
        "Command accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(accepted.into())))
}

/// Register a user for an event.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/events/<event_id>/register \
///   -H "Content-Type: application/json" \
///   -H "Idempotency-Key: 3f1c" \
///   -d '{"user_id": "alice"}'
/// # 202 {"message":"Registration request submitted","idempotency_key":"...","submitted_at":"..."}
/// ```
///
/// # Errors
///
/// 400 for a malformed event or user id, 404 for an unknown event, 503 when
/// the command could not be queued.
pub async fn register(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(event_id): Path<String>,
    IdempotencyNonce(nonce): IdempotencyNonce,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let Json(body) = body?;
    let (event_id, user_id) = parse_ids(&event_id, body.user_id)?;
    submit(
        &state,
        SubmitRequest::register(event_id, user_id),
        nonce,
        correlation_id,
    )
    .await
}

/// Unregister a user from an event.
///
/// Refused with 404 `Registration not found` unless the user holds a spot or
/// has a register command in flight.
///
/// # Errors
///
/// 400 for malformed ids, 404 for an unknown event or missing registration,
/// 503 when the command could not be queued.
pub async fn unregister(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(event_id): Path<String>,
    IdempotencyNonce(nonce): IdempotencyNonce,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let Json(body) = body?;
    let (event_id, user_id) = parse_ids(&event_id, body.user_id)?;
    submit(
        &state,
        SubmitRequest::unregister(event_id, user_id),
        nonce,
        correlation_id,
    )
    .await
}

/// Current registration status of a user for an event.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/api/v1/events/<event_id>/registrations/alice
/// # {"event_id":"...","user_id":"alice","status":"Registered","rejection":null,"last_updated":"..."}
/// ```
///
/// # Errors
///
/// 400 for malformed ids, 404 for an unknown event, 503 if the store is down.
pub async fn get_status(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> Result<Json<StatusReport>, AppError> {
    let (event_id, user_id) = parse_ids(&event_id, user_id)?;
    let report = state.reconciler.get_status(event_id, &user_id).await?;
    Ok(Json(report))
}
