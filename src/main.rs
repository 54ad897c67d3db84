use secrecy::ExposeSecret;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatepass::api::{self, AppState};
use gatepass::config::Config;
use gatepass::db;
use gatepass::services::credential::CredentialCodec;
use gatepass::services::entitlement_store::PgEntitlementStore;
use gatepass::services::scan_engine::ScanPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatepass=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting gatepass server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        scan_clock = ?config.scan_clock,
        max_credential_skew_days = ?config.max_credential_skew_days,
        "Configuration loaded successfully"
    );

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Build application state
    let state = AppState {
        store: Arc::new(PgEntitlementStore::new(pool)),
        codec: Arc::new(CredentialCodec::new(
            config.credential_secret.expose_secret().as_bytes(),
        )),
        clock: config.scan_clock,
        policy: ScanPolicy {
            max_credential_skew_days: config.max_credential_skew_days,
        },
    };

    let app = api::app(state);

    let host: IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((host, config.port));
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        return;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
