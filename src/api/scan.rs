use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::Result;
use crate::models::{entitlement::Entitlement, ticket::Ticket};
use crate::services::attendance::AttendanceSummary;
use crate::services::scan_engine::{InvalidReason, ScanOutcome};
use crate::services::scanner::{self, ScanReport};

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Text exactly as decoded from the QR code
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub outcome: &'static str,
    pub accepted: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
    pub scan_date: NaiveDate,
    pub ticket: Option<Ticket>,
    pub entitlement: Option<Entitlement>,
    /// When the entitlement was used: now if accepted, the first scan if already used
    pub scanned_at: Option<DateTime<Utc>>,
    pub summary: Option<AttendanceSummary>,
}

impl From<ScanReport> for ScanResponse {
    fn from(report: ScanReport) -> Self {
        let (reason, entitlement) = match &report.outcome {
            ScanOutcome::Invalid(reason) => (Some(*reason), None),
            ScanOutcome::TicketInactive(_)
            | ScanOutcome::OutOfRange
            | ScanOutcome::NoEntitlementToday => (None, None),
            ScanOutcome::AlreadyUsed(row) | ScanOutcome::Accepted(row) => (None, Some(row.clone())),
        };

        Self {
            outcome: report.outcome.code(),
            accepted: report.outcome.is_accepted(),
            message: report.outcome.message(),
            reason,
            scan_date: report.scan_date,
            scanned_at: entitlement.as_ref().and_then(|e| e.scanned_at),
            entitlement,
            ticket: report.ticket,
            summary: report.summary,
        }
    }
}

/// Scan a ticket at the gate
///
/// Every decision, including rejections, is a 200. Only store failures produce
/// an error status, and the device should retry those.
async fn scan_ticket(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>> {
    let report = scanner::scan(
        state.store.as_ref(),
        &state.codec,
        &state.policy,
        &req.payload,
        state.clock.today(),
        Utc::now(),
    )
    .await?;

    Ok(Json(report.into()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/scan", post(scan_ticket))
}
