use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{entitlement::Entitlement, event::Event, ticket::Ticket};
use crate::services::attendance::AttendanceSummary;
use crate::services::entitlement_store::{EntitlementStore, StoreError};
use crate::services::scan_engine::{self, Decision};

/// Everything staff see about a ticket before committing a scan
#[derive(Debug, Clone)]
pub struct TicketOverview {
    pub ticket: Ticket,
    pub event: Event,
    pub entitlements: Vec<Entitlement>,
    pub summary: AttendanceSummary,
    /// What a scan right now would do, without doing it
    pub today: Decision,
}

#[derive(Debug, Clone)]
pub enum LookupResult {
    Found(TicketOverview),
    TicketInactive(TicketOverview),
    NotFound,
}

/// Read-only ticket preview by ticket ID or ticket code. Never changes entitlements.
#[tracing::instrument(skip(store))]
pub async fn lookup(
    store: &dyn EntitlementStore,
    ticket_code_or_id: &str,
    today: NaiveDate,
) -> Result<LookupResult, StoreError> {
    let query = ticket_code_or_id.trim();
    if query.is_empty() {
        return Ok(LookupResult::NotFound);
    }

    let by_id = match Uuid::parse_str(query) {
        Ok(id) => store.find_ticket_by_id(id).await?,
        Err(_) => None,
    };
    let ticket = match by_id {
        Some(ticket) => ticket,
        None => match store.find_ticket_by_code(query).await? {
            Some(ticket) => ticket,
            None => {
                tracing::debug!("Ticket not found");
                return Ok(LookupResult::NotFound);
            }
        },
    };

    let event = store.find_event(ticket.event_id).await?.ok_or_else(|| {
        StoreError::Inconsistent(format!(
            "ticket {} references missing event {}",
            ticket.id, ticket.event_id
        ))
    })?;

    let entitlements = store.list_entitlements(ticket.id).await?;
    let summary = AttendanceSummary::build(&entitlements);
    let today = scan_engine::assess(&ticket, &event, &entitlements, today);

    tracing::debug!(ticket_id = %ticket.id, today = today.code(), "Ticket looked up");

    let overview = TicketOverview {
        ticket,
        event,
        entitlements,
        summary,
        today,
    };

    Ok(if overview.ticket.is_active() {
        LookupResult::Found(overview)
    } else {
        LookupResult::TicketInactive(overview)
    })
}
