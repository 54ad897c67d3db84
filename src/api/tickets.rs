use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{entitlement::Entitlement, event::Event, scan_log::ScanLog, ticket::Ticket};
use crate::services::attendance::AttendanceSummary;
use crate::services::credential::{self, Credential};
use crate::services::issuance::{self, EntitlementPlan};
use crate::services::lookup::{self, LookupResult, TicketOverview};
use crate::services::qr_generator;
use crate::services::scan_engine::Decision;

const DEFAULT_SCAN_HISTORY: i64 = 50;
const MAX_SCAN_HISTORY: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub status: &'static str, // "found" or "ticket_inactive"
    pub ticket: Ticket,
    pub event: Event,
    pub entitlements: Vec<Entitlement>,
    pub summary: AttendanceSummary,
    /// Outcome a scan would have right now, "ADMISSIBLE" if it would be accepted
    pub today: &'static str,
    pub today_message: String,
}

impl LookupResponse {
    fn new(status: &'static str, overview: TicketOverview) -> Self {
        let today_message = match &overview.today {
            Decision::Consume { .. } => "Valid for entry today".to_string(),
            Decision::Reject(outcome) => outcome.message(),
        };

        Self {
            status,
            today: overview.today.code(),
            today_message,
            ticket: overview.ticket,
            event: overview.event,
            entitlements: overview.entitlements,
            summary: overview.summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub date: NaiveDate,
    /// Text to render into the QR code
    pub payload: String,
}

impl TryFrom<Credential> for CredentialResponse {
    type Error = AppError;

    fn try_from(credential: Credential) -> Result<Self> {
        Ok(Self {
            date: credential.date,
            payload: credential.to_payload()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanHistoryParams {
    pub limit: Option<i64>,
}

/// Preview a ticket by code or ID without using it
async fn lookup_ticket(
    State(state): State<AppState>,
    Query(params): Query<LookupQuery>,
) -> Result<Json<LookupResponse>> {
    match lookup::lookup(state.store.as_ref(), &params.q, state.clock.today()).await? {
        LookupResult::Found(overview) => Ok(Json(LookupResponse::new("found", overview))),
        LookupResult::TicketInactive(overview) => {
            Ok(Json(LookupResponse::new("ticket_inactive", overview)))
        }
        LookupResult::NotFound => Err(AppError::NotFound("Ticket not found".to_string())),
    }
}

/// Grant a freshly fulfilled ticket its admission days
async fn issue_entitlements(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(plan): Json<EntitlementPlan>,
) -> Result<(StatusCode, Json<Vec<Entitlement>>)> {
    let rows = issuance::issue_entitlements(state.store.as_ref(), ticket_id, &plan).await?;

    Ok((StatusCode::CREATED, Json(rows)))
}

/// One credential per admission day
async fn list_credentials(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<CredentialResponse>>> {
    let credentials =
        issuance::credentials_for_ticket(state.store.as_ref(), &state.codec, ticket_id).await?;

    let response = credentials
        .into_iter()
        .map(CredentialResponse::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(response))
}

async fn credential_for_path(state: &AppState, ticket_id: Uuid, date: &str) -> Result<Credential> {
    let day = credential::parse_date(date)
        .ok_or_else(|| AppError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", date)))?;

    Ok(issuance::credential_for_day(state.store.as_ref(), &state.codec, ticket_id, day).await?)
}

async fn credential_qr_svg(
    State(state): State<AppState>,
    Path((ticket_id, date)): Path<(Uuid, String)>,
) -> Result<Response> {
    let credential = credential_for_path(&state, ticket_id, &date).await?;
    let svg = qr_generator::generate_qr_svg(&credential)?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

async fn credential_qr_png(
    State(state): State<AppState>,
    Path((ticket_id, date)): Path<(Uuid, String)>,
) -> Result<Response> {
    let credential = credential_for_path(&state, ticket_id, &date).await?;
    let png = qr_generator::generate_qr_png(&credential)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Scan attempts for a ticket, newest first
async fn scan_history(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Query(params): Query<ScanHistoryParams>,
) -> Result<Json<Vec<ScanLog>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SCAN_HISTORY)
        .clamp(1, MAX_SCAN_HISTORY);

    let logs = state.store.list_scans(ticket_id, limit).await?;

    Ok(Json(logs))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tickets/lookup", get(lookup_ticket))
        .route("/api/tickets/:ticket_id/entitlements", post(issue_entitlements))
        .route("/api/tickets/:ticket_id/credentials", get(list_credentials))
        .route(
            "/api/tickets/:ticket_id/credentials/:date/qr.svg",
            get(credential_qr_svg),
        )
        .route(
            "/api/tickets/:ticket_id/credentials/:date/qr.png",
            get(credential_qr_png),
        )
        .route("/api/tickets/:ticket_id/scans", get(scan_history))
}
