//! Prometheus metrics for the registration coordinator.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `registration_submissions_total{kind,result}` - Submit calls by outcome
//!   (`accepted`, `not_found`, `invalid`, `transient`)
//! - `registration_outcomes_total{outcome}` - Applied commands by outcome
//!   (`registered`, `event_full`, `duplicate`, ...)
//! - `registration_redeliveries_total` - Deliveries received more than once
//! - `registration_apply_failures_total` - Applies that left the command for redelivery
//! - `registration_poison_messages_total` - Undecodable queue payloads
//!
//! ## Gauges
//! - `registration_workers_active` - Processor workers currently subscribed
//!
//! ## Histograms
//! - `registration_apply_duration_seconds` - Time spent in one store apply
//!
//! # Example
//!
//! ```rust,no_run
//! use rollcall_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render for a /metrics endpoint
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rollcall_core::capacity::Outcome;
use rollcall_core::types::CommandKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder for the coordinator.
///
/// Installs the global recorder; the binary serves [`render`](Self::render)
/// on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the exporter will be served on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the exporter is served on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs
    /// a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") || err_msg.contains("global recorder") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "registration_submissions_total",
        "Total number of register/unregister submissions by kind and result"
    );
    describe_counter!(
        "registration_outcomes_total",
        "Total number of applied commands by outcome"
    );
    describe_counter!(
        "registration_redeliveries_total",
        "Total number of deliveries received more than once"
    );
    describe_counter!(
        "registration_apply_failures_total",
        "Total number of applies that failed and were left for redelivery"
    );
    describe_counter!(
        "registration_poison_messages_total",
        "Total number of undecodable queue payloads"
    );
    describe_gauge!(
        "registration_workers_active",
        "Current number of subscribed processor workers"
    );
    describe_histogram!(
        "registration_apply_duration_seconds",
        "Time taken to apply one command to the capacity store"
    );
}

/// Registration metrics recorder.
pub struct RegistrationMetrics;

impl RegistrationMetrics {
    /// Record a submit call and its result label.
    pub fn record_submission(kind: CommandKind, result: &'static str) {
        counter!(
            "registration_submissions_total",
            "kind" => kind.as_str(),
            "result" => result
        )
        .increment(1);
    }

    /// Record an applied command.
    pub fn record_outcome(outcome: Outcome, duration: Duration) {
        counter!("registration_outcomes_total", "outcome" => outcome.label()).increment(1);
        histogram!("registration_apply_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed apply.
    pub fn record_apply_failure() {
        counter!("registration_apply_failures_total").increment(1);
    }

    /// Record a redelivered command.
    pub fn record_redelivery() {
        counter!("registration_redeliveries_total").increment(1);
    }

    /// Record an undecodable payload.
    pub fn record_poison_message() {
        counter!("registration_poison_messages_total").increment(1);
    }

    /// Record a worker subscribing (`true`) or unsubscribing (`false`).
    pub fn record_worker_active(active: bool) {
        if active {
            gauge!("registration_workers_active").increment(1.0);
        } else {
            gauge!("registration_workers_active").decrement(1.0);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rollcall_core::capacity::{AppliedChange, SkipReason};

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        RegistrationMetrics::record_submission(CommandKind::Register, "accepted");
        RegistrationMetrics::record_outcome(
            Outcome::Applied(AppliedChange::Registered),
            Duration::from_millis(3),
        );
        RegistrationMetrics::record_outcome(
            Outcome::Skipped(SkipReason::EventFull),
            Duration::from_millis(2),
        );
        RegistrationMetrics::record_redelivery();

        // The recorder is process-global; another test may own the handle.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("registration_submissions_total"));
            assert!(rendered.contains("outcome=\"event_full\""));
            assert!(rendered.contains("registration_redeliveries_total"));
        }
    }
}
