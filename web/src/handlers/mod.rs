//! HTTP request handlers, organized by resource.

pub mod events;
pub mod health;
pub mod registrations;

pub use health::{health_check, readiness_check};
