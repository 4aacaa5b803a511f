//! # Rollcall Runtime
//!
//! The moving parts of the registration coordinator.
//!
//! ## Core Components
//!
//! - **Submitter**: checks cheap preconditions and enqueues one command per request
//! - **Processor**: applies a command to the capacity store in one transaction
//! - **Worker**: subscribe-process-reconnect loop driving the processor
//! - **Reconciler**: read path reporting `Pending`, `Registered` or `Unregistered`
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_runtime::{ProcessorWorker, RegistrationProcessor, RegistrationSubmitter, SubmitRequest};
//!
//! let submitter = RegistrationSubmitter::new(catalog, store.clone(), queue.clone(), clock.clone());
//! let processor = Arc::new(RegistrationProcessor::new(store, clock));
//! let worker = ProcessorWorker::new("processor-0", processor, queue, shutdown_rx).spawn();
//!
//! let accepted = submitter.submit(SubmitRequest::register(event_id, user_id)).await?;
//! // 202 Accepted; poll the reconciler for the outcome
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub mod processor;
pub mod reconciler;
pub mod submitter;
pub mod worker;

pub use processor::RegistrationProcessor;
pub use reconciler::{StatusReconciler, StatusReport};
pub use submitter::{Accepted, RegistrationSubmitter, SubmitRequest};
pub use worker::ProcessorWorker;
