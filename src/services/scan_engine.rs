//! Admission decision for a single scan attempt.
//!
//! Everything here is pure: the caller loads the ticket, its event and its
//! entitlement rows, and applies the one write a [`Decision::Consume`] asks for.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{
    entitlement::{Entitlement, EntitlementStatus},
    event::Event,
    ticket::{Ticket, TicketStatus},
};
use crate::services::credential::Credential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Malformed,
    BadSignature,
    UnknownTicket,
    TicketMismatch,
    StaleCredential,
}

/// Terminal result of a scan attempt.
///
/// These are answers for the gate staff, not faults. Storage failures travel
/// separately as `StoreError`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Invalid(InvalidReason),
    TicketInactive(TicketStatus),
    OutOfRange,
    NoEntitlementToday,
    /// Carries the row as first consumed, including its original `scanned_at`
    AlreadyUsed(Entitlement),
    Accepted(Entitlement),
}

impl ScanOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            ScanOutcome::Invalid(_) => "INVALID",
            ScanOutcome::TicketInactive(_) => "TICKET_INACTIVE",
            ScanOutcome::OutOfRange => "OUT_OF_RANGE",
            ScanOutcome::NoEntitlementToday => "NO_ENTITLEMENT_TODAY",
            ScanOutcome::AlreadyUsed(_) => "ALREADY_USED",
            ScanOutcome::Accepted(_) => "ACCEPTED",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ScanOutcome::Invalid(InvalidReason::Malformed) => "Unreadable QR code".to_string(),
            ScanOutcome::Invalid(InvalidReason::BadSignature) => {
                "QR code signature is not valid".to_string()
            }
            ScanOutcome::Invalid(InvalidReason::UnknownTicket) => "Unknown ticket".to_string(),
            ScanOutcome::Invalid(InvalidReason::TicketMismatch) => {
                "QR code does not match the ticket on record".to_string()
            }
            ScanOutcome::Invalid(InvalidReason::StaleCredential) => {
                "QR code is too old, ask the holder to refresh it".to_string()
            }
            ScanOutcome::TicketInactive(TicketStatus::Cancelled) => {
                "Ticket has been cancelled".to_string()
            }
            ScanOutcome::TicketInactive(TicketStatus::Expired) => "Ticket has expired".to_string(),
            ScanOutcome::TicketInactive(TicketStatus::Active) => "Ticket is not active".to_string(),
            ScanOutcome::OutOfRange => "Event is not running on this day".to_string(),
            ScanOutcome::NoEntitlementToday => "Ticket is not valid today".to_string(),
            ScanOutcome::AlreadyUsed(row) => match row.scanned_at {
                Some(at) => format!("Already used today at {}", at.format("%H:%M:%S UTC")),
                None => "Already used today".to_string(),
            },
            ScanOutcome::Accepted(_) => "Welcome!".to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ScanOutcome::Accepted(_))
    }
}

/// What the caller should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Stop here and report this outcome; nothing is written
    Reject(ScanOutcome),
    /// Atomically use up the entitlement for `day`
    Consume { day: NaiveDate },
}

impl Decision {
    pub fn code(&self) -> &'static str {
        match self {
            Decision::Reject(outcome) => outcome.code(),
            Decision::Consume { .. } => "ADMISSIBLE",
        }
    }
}

/// Tunables that are deployment policy rather than protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPolicy {
    /// Reject credentials whose embedded day is more than this many days away
    /// from the scan day. `None` judges every credential against today only.
    pub max_credential_skew_days: Option<u32>,
}

/// Decides a scan of an already verified credential.
///
/// `ticket` is the record found by the credential's ticket code, `event` the
/// ticket's event, `today` the venue's calendar day.
pub fn decide(
    credential: &Credential,
    ticket: &Ticket,
    event: &Event,
    entitlements: &[Entitlement],
    today: NaiveDate,
    policy: &ScanPolicy,
) -> Decision {
    if credential.ticket_id != ticket.id || credential.event_id != ticket.event_id {
        return Decision::Reject(ScanOutcome::Invalid(InvalidReason::TicketMismatch));
    }

    if !ticket.is_active() {
        return Decision::Reject(ScanOutcome::TicketInactive(ticket.status));
    }

    if !event.is_running_on(credential.date) {
        return Decision::Reject(ScanOutcome::OutOfRange);
    }

    if let Some(max_skew) = policy.max_credential_skew_days {
        if (today - credential.date).num_days().unsigned_abs() > u64::from(max_skew) {
            return Decision::Reject(ScanOutcome::Invalid(InvalidReason::StaleCredential));
        }
    }

    assess(ticket, event, entitlements, today)
}

/// Ticket-level part of the decision, shared with the read-only lookup.
///
/// The day that matters is `today`, never the day a credential was generated for.
pub fn assess(
    ticket: &Ticket,
    event: &Event,
    entitlements: &[Entitlement],
    today: NaiveDate,
) -> Decision {
    if !ticket.is_active() {
        return Decision::Reject(ScanOutcome::TicketInactive(ticket.status));
    }

    if !event.is_running_on(today) {
        return Decision::Reject(ScanOutcome::OutOfRange);
    }

    match entitlements.iter().find(|e| e.entitlement_date == today) {
        None => Decision::Reject(ScanOutcome::NoEntitlementToday),
        Some(row) => match row.status {
            EntitlementStatus::Used => Decision::Reject(ScanOutcome::AlreadyUsed(row.clone())),
            EntitlementStatus::Available => Decision::Consume { day: today },
        },
    }
}
