//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id (set by the middleware, or
//!   read from the header, or freshly generated)
//! - `IdempotencyNonce`: optional caller-supplied `Idempotency-Key` header
//!
//! # Examples
//!
//! ```ignore
//! async fn register(
//!     State(state): State<AppState>,
//!     correlation_id: CorrelationId,
//!     IdempotencyNonce(nonce): IdempotencyNonce,
//!     Json(body): Json<RegistrationRequest>,
//! ) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, "Registering");
//!     ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying a caller-chosen idempotency nonce.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Correlation ID for request tracing.
///
/// Prefers the id stored by [`correlation_id_layer`](crate::middleware::correlation_id_layer),
/// then the `X-Correlation-ID` header, then a new UUID v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Optional `Idempotency-Key` header.
///
/// Retries of one logical request should carry the same nonce so they map to
/// the same command key. Without it the key is derived from a time bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyNonce(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyNonce
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let nonce = value
            .to_str()
            .map_err(|_| AppError::bad_request("Idempotency-Key must be visible ASCII"))?
            .trim();

        if nonce.is_empty() {
            return Ok(Self(None));
        }
        Ok(Self(Some(nonce.to_string())))
    }
}
