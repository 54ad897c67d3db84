// API module - HTTP endpoints

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::ScanClock;
use crate::services::credential::CredentialCodec;
use crate::services::entitlement_store::EntitlementStore;
use crate::services::scan_engine::ScanPolicy;

pub mod health;
pub mod scan;
pub mod tickets;

/// Shared by every request; the store is the only state scans have in common
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntitlementStore>,
    pub codec: Arc<CredentialCodec>,
    pub clock: ScanClock,
    pub policy: ScanPolicy,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(scan::router())
        .merge(tickets::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
