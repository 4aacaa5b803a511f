//! # Rollcall Server
//!
//! Process assembly for the registration coordinator: configuration,
//! backend bootstrap, and the lifecycle tying the HTTP API, the `/metrics`
//! endpoint and the processor workers together.
//!
//! ```text
//! Config::from_env ─► Components::connect ─► Application::build ─► run
//!                      (postgres + redpanda,                        │
//!                       or in-memory)                               ├─ HTTP API (rollcall-web)
//!                                                                   ├─ /metrics
//!                                                                   └─ N processor workers
//! ```

pub mod bootstrap;
pub mod config;
pub mod lifecycle;

pub use bootstrap::Components;
pub use config::{Backend, Config, ConfigError};
pub use lifecycle::{Application, shutdown_signal};
