//! HTTP API for the Rollcall registration coordinator.
//!
//! The handlers are a thin imperative shell: parse the request, hand it to the
//! submitter or reconciler from `rollcall-runtime`, map the result to HTTP.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives; the correlation layer tags it with an id
//! 2. **Extract** path ids, JSON body and the optional `Idempotency-Key`
//! 3. **Submit** a register/unregister command (or read status)
//! 4. **Map** `RegistrationError` to an [`AppError`] response
//!
//! ```text
//! POST /api/v1/events/:id/register ──► submitter ──► 202 Accepted
//!                                                       │
//! GET  /api/v1/events/:id/registrations/:user_id ◄──────┘ poll until settled
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rollcall_web::{AppState, build_router};
//!
//! let state = AppState::new(catalog, store, queue, Arc::new(SystemClock));
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{CorrelationId, IDEMPOTENCY_KEY_HEADER, IdempotencyNonce};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::build_router;
pub use state::AppState;
