//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: connect the backend, bind listeners, spawn processor workers
//! 2. **Runtime**: serve the HTTP API and `/metrics`
//! 3. **Shutdown**: stop accepting requests, broadcast shutdown to workers,
//!    wait up to the configured timeout for in-flight deliveries to settle
//!
//! ```rust,ignore
//! let app = Application::build(Config::from_env()?).await?;
//! app.run().await?;
//! ```

use crate::bootstrap::Components;
use crate::config::Config;
use anyhow::Context;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use rollcall_core::environment::SystemClock;
use rollcall_runtime::metrics::MetricsServer;
use rollcall_runtime::retry::RetryPolicy;
use rollcall_runtime::{ProcessorWorker, RegistrationProcessor};
use rollcall_web::{AppState, build_router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Running application: HTTP API, metrics endpoint and processor workers.
pub struct Application {
    config: Config,
    components: Components,
    listener: TcpListener,
    metrics_listener: TcpListener,
    metrics: Arc<MetricsServer>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Connect the backend and bind both listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable, a listener cannot be
    /// bound, or the metrics recorder cannot be installed.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let components = Components::connect(&config).await?;
        Self::with_components(config, components).await
    }

    /// Like [`build`](Self::build), with collaborators supplied by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound or the metrics recorder
    /// cannot be installed.
    pub async fn with_components(config: Config, components: Components) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.server.http_addr())
            .await
            .with_context(|| format!("Failed to bind {}", config.server.http_addr()))?;
        let metrics_listener = TcpListener::bind(config.server.metrics_addr())
            .await
            .with_context(|| format!("Failed to bind {}", config.server.metrics_addr()))?;

        let mut metrics = MetricsServer::new(metrics_listener.local_addr()?);
        metrics.start()?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            components,
            listener,
            metrics_listener,
            metrics: Arc::new(metrics),
            shutdown_tx,
        })
    }

    /// Address the HTTP API is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address `/metrics` is served on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn metrics_addr(&self) -> std::io::Result<SocketAddr> {
        self.metrics_listener.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            config,
            components,
            listener,
            metrics_listener,
            metrics,
            shutdown_tx,
        } = self;

        let workers = spawn_workers(&config, &components, &shutdown_tx);
        let metrics_handle = spawn_metrics(metrics_listener, metrics, shutdown_tx.subscribe());

        let state = AppState::new(
            components.catalog,
            components.store,
            components.queue,
            Arc::new(SystemClock),
        )
        .with_idempotency_bucket(config.processor.idempotency_bucket());

        info!(address = %listener.local_addr()?, "HTTP server listening");
        axum::serve(listener, build_router(state))
            .with_graceful_shutdown(signal)
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped, initiating graceful shutdown");
        let _ = shutdown_tx.send(());

        let timeout = config.server.shutdown_timeout();
        await_shutdown(workers, timeout).await;
        if tokio::time::timeout(timeout, metrics_handle).await.is_err() {
            warn!("Metrics server shutdown timed out");
        }

        info!("Graceful shutdown complete");
        Ok(())
    }
}

fn spawn_workers(
    config: &Config,
    components: &Components,
    shutdown_tx: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let processor = Arc::new(RegistrationProcessor::new(
        Arc::clone(&components.store),
        Arc::new(SystemClock),
    ));
    let retry_policy = RetryPolicy::builder()
        .initial_delay(config.processor.retry_initial())
        .max_delay(config.processor.retry_max())
        .build();

    info!(workers = config.processor.workers, "Starting processor workers");
    (0..config.processor.workers)
        .map(|n| {
            ProcessorWorker::new(
                format!("processor-{n}"),
                Arc::clone(&processor),
                Arc::clone(&components.queue),
                shutdown_tx.subscribe(),
            )
            .with_retry_policy(retry_policy.clone())
            .spawn()
        })
        .collect()
}

fn spawn_metrics(
    listener: TcpListener,
    metrics: Arc<MetricsServer>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);

    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Metrics endpoint listening");
        }
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Metrics server failed");
        }
    })
}

/// Serve the Prometheus text exposition.
async fn render_metrics(State(metrics): State<Arc<MetricsServer>>) -> (StatusCode, String) {
    match metrics.render() {
        Some(body) => (StatusCode::OK, body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Wait for processor workers to settle their current delivery.
async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: std::time::Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(worker = idx, "Worker stopped gracefully"),
            Ok(Err(e)) => warn!(worker = idx, error = %e, "Worker task failed"),
            Err(_) => warn!(worker = idx, "Worker shutdown timed out"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A signal handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
