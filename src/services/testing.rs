// Fixtures shared by the service and API tests

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    event::Event,
    ticket::{Ticket, TicketStatus},
};
use crate::services::credential::CredentialCodec;
use crate::services::entitlement_store::{EntitlementStore, MemoryEntitlementStore};

pub const SECRET: &[u8] = b"gate-test-secret";

pub fn jan(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

pub struct Venue {
    pub store: Arc<MemoryEntitlementStore>,
    pub codec: CredentialCodec,
    pub event: Event,
    pub ticket: Ticket,
}

impl Venue {
    /// Event running Jan 1 - Jan 3 with one active ticket and no entitlements yet
    pub fn new() -> Self {
        let store = Arc::new(MemoryEntitlementStore::new());

        let event = Event {
            id: Uuid::new_v4(),
            name: "Riverside Folk Days".to_string(),
            start_date: jan(1),
            end_date: jan(3),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let ticket = Ticket {
            id: Uuid::new_v4(),
            event_id: event.id,
            user_id: Uuid::new_v4(),
            ticket_code: "RFD-2025-0042".to_string(),
            status: TicketStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        store.insert_event(event.clone());
        store.insert_ticket(ticket.clone());

        Self {
            store,
            codec: CredentialCodec::new(SECRET),
            event,
            ticket,
        }
    }

    /// Same venue with entitlements issued for `days`
    pub async fn with_days(days: &[NaiveDate]) -> Self {
        let venue = Self::new();
        venue
            .store
            .issue_entitlements(venue.ticket.id, days)
            .await
            .unwrap();
        venue
    }

    /// Signed QR text for this venue's ticket, generated for `day`
    pub fn qr(&self, day: NaiveDate) -> String {
        self.codec
            .encode(
                self.ticket.id,
                self.event.id,
                self.ticket.user_id,
                &self.ticket.ticket_code,
                day,
            )
            .unwrap()
            .to_payload()
            .unwrap()
    }
}
