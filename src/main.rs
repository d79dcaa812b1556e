use anyhow::Context;
use api_rest::{router, AppState};
use hms_core::{CoreConfig, Hms};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions are purged.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Main entry point for the HMS application
///
/// Starts the REST server and a background task that purges expired sessions. Both stop on
/// Ctrl-C; in-flight requests are allowed to finish.
///
/// # Environment Variables
/// - `HMS_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `HMS_STORE`, `HMS_DATA_DIR`, `HMS_FILES_DIR`: where documents and attachments live
/// - `HMS_BOOTSTRAP_ADMIN_EMAIL`, `HMS_BOOTSTRAP_ADMIN_PASSWORD`: first administrator
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, store startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hms=info".parse()?)
                .add_directive("hms_run=info".parse()?)
                .add_directive("hms_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(CoreConfig::from_env().context("invalid HMS configuration")?);
    let hms = Hms::open(cfg).context("failed to open the document store")?;
    if let Some(admin) = hms.auth().bootstrap_admin().await? {
        tracing::info!("created bootstrap administrator {}", admin.data.email);
    }

    let rest_addr = std::env::var("HMS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("++ Starting HMS REST on {}", rest_addr);

    let sweeper = tokio::spawn(sweep_sessions(hms.clone()));

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, router(AppState::new(hms)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("-- HMS stopped");
    Ok(())
}

async fn sweep_sessions(hms: Hms) {
    let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = hms.auth().purge_expired().await {
            tracing::warn!("session sweep failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutdown requested");
}
