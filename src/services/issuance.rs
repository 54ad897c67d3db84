use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{entitlement::Entitlement, event::Event, ticket::Ticket};
use crate::services::credential::{Credential, CredentialCodec, CredentialError};
use crate::services::entitlement_store::{EntitlementStore, IssueResult, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum IssuanceError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Credential error: {0}")]
    CredentialError(#[from] CredentialError),

    #[error("Ticket not found")]
    TicketNotFound,

    #[error("Ticket is not active")]
    TicketInactive,

    #[error("Ticket already holds its entitlements")]
    AlreadyIssued,

    #[error("Ticket has no entitlement on {0}")]
    NotEntitled(NaiveDate),

    #[error("Invalid entitlement plan: {0}")]
    InvalidPlan(String),
}

/// Which event days a ticket type grants
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntitlementPlan {
    /// Every day of the event
    FullSpan,
    /// `days` consecutive days from `starting` (the first event day by default)
    Package {
        days: u32,
        #[serde(default)]
        starting: Option<NaiveDate>,
    },
    /// An explicit list of days
    ValidDays { dates: Vec<NaiveDate> },
}

impl EntitlementPlan {
    /// Resolves the plan to the concrete, ascending days it grants for `event`
    pub fn resolve(&self, event: &Event) -> Result<Vec<NaiveDate>, IssuanceError> {
        match self {
            EntitlementPlan::FullSpan => Ok(event.days()),
            EntitlementPlan::Package { days, starting } => {
                if *days == 0 {
                    return Err(IssuanceError::InvalidPlan(
                        "package must grant at least one day".to_string(),
                    ));
                }

                let first = starting.unwrap_or(event.start_date);
                let last = first
                    .checked_add_days(Days::new(u64::from(*days) - 1))
                    .ok_or_else(|| IssuanceError::InvalidPlan("package end overflows".to_string()))?;

                if !event.is_running_on(first) || !event.is_running_on(last) {
                    return Err(IssuanceError::InvalidPlan(format!(
                        "{}-day package from {} does not fit the event ({} to {})",
                        days, first, event.start_date, event.end_date
                    )));
                }

                Ok(first.iter_days().take_while(|d| *d <= last).collect())
            }
            EntitlementPlan::ValidDays { dates } => {
                let unique: BTreeSet<NaiveDate> = dates.iter().copied().collect();

                if unique.is_empty() {
                    return Err(IssuanceError::InvalidPlan(
                        "at least one valid day is required".to_string(),
                    ));
                }
                if let Some(outside) = unique.iter().find(|d| !event.is_running_on(**d)) {
                    return Err(IssuanceError::InvalidPlan(format!(
                        "{} is outside the event ({} to {})",
                        outside, event.start_date, event.end_date
                    )));
                }

                Ok(unique.into_iter().collect())
            }
        }
    }
}

async fn load_ticket_and_event(
    store: &dyn EntitlementStore,
    ticket_id: Uuid,
) -> Result<(Ticket, Event), IssuanceError> {
    let ticket = store
        .find_ticket_by_id(ticket_id)
        .await?
        .ok_or(IssuanceError::TicketNotFound)?;

    let event = store.find_event(ticket.event_id).await?.ok_or_else(|| {
        StoreError::Inconsistent(format!(
            "ticket {} references missing event {}",
            ticket.id, ticket.event_id
        ))
    })?;

    Ok((ticket, event))
}

/// Grants a ticket its entitlement days. Happens once per ticket, at fulfillment.
#[tracing::instrument(skip(store, plan))]
pub async fn issue_entitlements(
    store: &dyn EntitlementStore,
    ticket_id: Uuid,
    plan: &EntitlementPlan,
) -> Result<Vec<Entitlement>, IssuanceError> {
    let (ticket, event) = load_ticket_and_event(store, ticket_id).await?;

    if !ticket.is_active() {
        return Err(IssuanceError::TicketInactive);
    }

    let days = plan.resolve(&event)?;

    match store.issue_entitlements(ticket.id, &days).await? {
        IssueResult::Issued(rows) => {
            tracing::info!(
                ticket_id = %ticket.id,
                event_id = %event.id,
                days = rows.len(),
                "Entitlements issued"
            );
            Ok(rows)
        }
        IssueResult::AlreadyIssued => {
            tracing::warn!(ticket_id = %ticket.id, "Refused to re-issue entitlements");
            Err(IssuanceError::AlreadyIssued)
        }
    }
}

/// Derives one credential per entitlement day of a ticket
#[tracing::instrument(skip(store, codec))]
pub async fn credentials_for_ticket(
    store: &dyn EntitlementStore,
    codec: &CredentialCodec,
    ticket_id: Uuid,
) -> Result<Vec<Credential>, IssuanceError> {
    let (ticket, _event) = load_ticket_and_event(store, ticket_id).await?;

    if !ticket.is_active() {
        return Err(IssuanceError::TicketInactive);
    }

    let entitlements = store.list_entitlements(ticket.id).await?;

    entitlements
        .iter()
        .map(|e| encode_for(codec, &ticket, e.entitlement_date))
        .collect()
}

/// Derives the credential of a ticket for one of its entitlement days
#[tracing::instrument(skip(store, codec))]
pub async fn credential_for_day(
    store: &dyn EntitlementStore,
    codec: &CredentialCodec,
    ticket_id: Uuid,
    day: NaiveDate,
) -> Result<Credential, IssuanceError> {
    let (ticket, _event) = load_ticket_and_event(store, ticket_id).await?;

    if !ticket.is_active() {
        return Err(IssuanceError::TicketInactive);
    }

    let entitlements = store.list_entitlements(ticket.id).await?;
    if !entitlements.iter().any(|e| e.entitlement_date == day) {
        return Err(IssuanceError::NotEntitled(day));
    }

    encode_for(codec, &ticket, day)
}

fn encode_for(
    codec: &CredentialCodec,
    ticket: &Ticket,
    day: NaiveDate,
) -> Result<Credential, IssuanceError> {
    Ok(codec.encode(
        ticket.id,
        ticket.event_id,
        ticket.user_id,
        &ticket.ticket_code,
        day,
    )?)
}
