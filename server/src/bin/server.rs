//! Rollcall registration server.
//!
//! Serves the registration API and runs the processor workers in one process.
//!
//! # Usage
//!
//! ```bash
//! # Durable backend (PostgreSQL + RedPanda)
//! docker compose up -d
//! cargo run -p rollcall-server
//!
//! # Everything in memory
//! ROLLCALL_BACKEND=memory cargo run -p rollcall-server
//! ```

use rollcall_server::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rollcall=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        backend = %config.backend,
        address = %config.server.http_addr(),
        metrics = %config.server.metrics_addr(),
        workers = config.processor.workers,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    app.run().await
}
