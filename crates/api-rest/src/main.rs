//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, without the session sweeper that the workspace's main
//! `hms-run` binary adds. Useful for development and for Swagger UI exploration.

use anyhow::Context;
use api_rest::{router, AppState};
use hms_core::{CoreConfig, Hms};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the HMS REST API server
///
/// # Environment Variables
/// - `HMS_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `HMS_STORE`, `HMS_DATA_DIR` and the other `HMS_*` settings read by [`CoreConfig::from_env`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or the store cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("hms_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(CoreConfig::from_env().context("invalid HMS configuration")?);
    let hms = Hms::open(cfg).context("failed to open the document store")?;
    if let Some(admin) = hms.auth().bootstrap_admin().await? {
        tracing::info!("created bootstrap administrator {}", admin.data.email);
    }

    let addr = std::env::var("HMS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("-- Starting HMS REST API on {}", addr);

    let app = router(AppState::new(hms));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
