use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    entitlement::{Entitlement, EntitlementStatus},
    event::Event,
    scan_log::{CreateScanLogData, ScanLog},
    ticket::{Ticket, TicketStatus},
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Inconsistent store state: {0}")]
    Inconsistent(String),
}

/// What happened when a scan tried to use up an entitlement
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeResult {
    /// This call flipped the row from available to used
    Consumed(Entitlement),
    /// The row was already used; carries the row with its original `scanned_at`
    AlreadyUsed(Entitlement),
    /// The ticket has no entitlement for that day
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueResult {
    Issued(Vec<Entitlement>),
    AlreadyIssued,
}

/// Storage seen by the scan core.
///
/// `consume_entitlement` must behave as one atomic compare-and-swap on the
/// `(ticket, day)` row. Implementations may not rely on in-process locking when
/// more than one server instance can share the storage.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn find_ticket_by_id(&self, id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn find_ticket_by_code(&self, ticket_code: &str) -> Result<Option<Ticket>, StoreError>;

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// All entitlements of a ticket, ascending by day
    async fn list_entitlements(&self, ticket_id: Uuid) -> Result<Vec<Entitlement>, StoreError>;

    async fn consume_entitlement(
        &self,
        ticket_id: Uuid,
        day: NaiveDate,
        scanned_at: DateTime<Utc>,
    ) -> Result<ConsumeResult, StoreError>;

    /// Writes the complete entitlement set of a ticket, or nothing if one exists
    async fn issue_entitlements(
        &self,
        ticket_id: Uuid,
        days: &[NaiveDate],
    ) -> Result<IssueResult, StoreError>;

    async fn record_scan(&self, data: CreateScanLogData) -> Result<(), StoreError>;

    async fn list_scans(&self, ticket_id: Uuid, limit: i64) -> Result<Vec<ScanLog>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn find_ticket_by_id(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(Ticket::find_by_id(&self.pool, id).await?)
    }

    async fn find_ticket_by_code(&self, ticket_code: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(Ticket::find_by_code(&self.pool, ticket_code).await?)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(Event::find_by_id(&self.pool, id).await?)
    }

    async fn list_entitlements(&self, ticket_id: Uuid) -> Result<Vec<Entitlement>, StoreError> {
        Ok(Entitlement::list_by_ticket(&self.pool, ticket_id).await?)
    }

    async fn consume_entitlement(
        &self,
        ticket_id: Uuid,
        day: NaiveDate,
        scanned_at: DateTime<Utc>,
    ) -> Result<ConsumeResult, StoreError> {
        if let Some(row) = Entitlement::mark_used(&self.pool, ticket_id, day, scanned_at).await? {
            return Ok(ConsumeResult::Consumed(row));
        }

        // Lost the race or the day was never available; find out which
        match Entitlement::find_for_day(&self.pool, ticket_id, day).await? {
            Some(row) if row.is_used() => Ok(ConsumeResult::AlreadyUsed(row)),
            Some(row) => Err(StoreError::Inconsistent(format!(
                "entitlement {} still available after conditional update",
                row.id
            ))),
            None => Ok(ConsumeResult::Missing),
        }
    }

    async fn issue_entitlements(
        &self,
        ticket_id: Uuid,
        days: &[NaiveDate],
    ) -> Result<IssueResult, StoreError> {
        let issued = Entitlement::create_for_ticket(&self.pool, ticket_id, days).await?;

        Ok(match issued {
            Some(rows) => IssueResult::Issued(rows),
            None => IssueResult::AlreadyIssued,
        })
    }

    async fn record_scan(&self, data: CreateScanLogData) -> Result<(), StoreError> {
        ScanLog::create(&self.pool, data).await?;
        Ok(())
    }

    async fn list_scans(&self, ticket_id: Uuid, limit: i64) -> Result<Vec<ScanLog>, StoreError> {
        Ok(ScanLog::list_by_ticket(&self.pool, ticket_id, limit).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    events: HashMap<Uuid, Event>,
    tickets: HashMap<Uuid, Ticket>,
    entitlements: HashMap<(Uuid, NaiveDate), Entitlement>,
    scans: Vec<ScanLog>,
}

/// In-memory store with the same atomicity guarantees as the PostgreSQL one.
///
/// Every operation runs under a single mutex acquisition, which makes the
/// consume step a true check-and-set within one process. This is the test
/// double behind the service and HTTP tests; the server always runs on
/// [`PgEntitlementStore`]. `set_unavailable` simulates an outage.
#[derive(Default)]
pub struct MemoryEntitlementStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn seed(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert_event(&self, event: Event) {
        self.seed().events.insert(event.id, event);
    }

    pub fn insert_ticket(&self, ticket: Ticket) {
        self.seed().tickets.insert(ticket.id, ticket);
    }

    pub fn set_ticket_status(&self, ticket_id: Uuid, status: TicketStatus) {
        if let Some(ticket) = self.seed().tickets.get_mut(&ticket_id) {
            ticket.status = status;
            ticket.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn find_ticket_by_id(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.state()?.tickets.get(&id).cloned())
    }

    async fn find_ticket_by_code(&self, ticket_code: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self
            .state()?
            .tickets
            .values()
            .find(|t| t.ticket_code == ticket_code)
            .cloned())
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.state()?.events.get(&id).cloned())
    }

    async fn list_entitlements(&self, ticket_id: Uuid) -> Result<Vec<Entitlement>, StoreError> {
        let mut rows: Vec<Entitlement> = self
            .state()?
            .entitlements
            .values()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.entitlement_date);
        Ok(rows)
    }

    async fn consume_entitlement(
        &self,
        ticket_id: Uuid,
        day: NaiveDate,
        scanned_at: DateTime<Utc>,
    ) -> Result<ConsumeResult, StoreError> {
        let mut state = self.state()?;

        let Some(row) = state.entitlements.get_mut(&(ticket_id, day)) else {
            return Ok(ConsumeResult::Missing);
        };

        match row.status {
            EntitlementStatus::Used => Ok(ConsumeResult::AlreadyUsed(row.clone())),
            EntitlementStatus::Available => {
                row.status = EntitlementStatus::Used;
                row.scanned_at = Some(scanned_at);
                Ok(ConsumeResult::Consumed(row.clone()))
            }
        }
    }

    async fn issue_entitlements(
        &self,
        ticket_id: Uuid,
        days: &[NaiveDate],
    ) -> Result<IssueResult, StoreError> {
        let mut state = self.state()?;

        if state.entitlements.keys().any(|(t, _)| *t == ticket_id) {
            return Ok(IssueResult::AlreadyIssued);
        }

        let now = Utc::now();
        let mut rows = Vec::with_capacity(days.len());
        for day in days {
            let row = Entitlement {
                id: Uuid::new_v4(),
                ticket_id,
                entitlement_date: *day,
                status: EntitlementStatus::Available,
                scanned_at: None,
                created_at: now,
            };
            state.entitlements.insert((ticket_id, *day), row.clone());
            rows.push(row);
        }
        rows.sort_by_key(|e| e.entitlement_date);

        Ok(IssueResult::Issued(rows))
    }

    async fn record_scan(&self, data: CreateScanLogData) -> Result<(), StoreError> {
        self.state()?.scans.push(ScanLog {
            id: Uuid::new_v4(),
            ticket_id: data.ticket_id,
            event_id: data.event_id,
            scan_date: data.scan_date,
            outcome: data.outcome,
            raw_payload: data.raw_payload,
            scanned_at: data.scanned_at,
        });
        Ok(())
    }

    async fn list_scans(&self, ticket_id: Uuid, limit: i64) -> Result<Vec<ScanLog>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut scans: Vec<ScanLog> = self
            .state()?
            .scans
            .iter()
            .filter(|s| s.ticket_id == Some(ticket_id))
            .cloned()
            .collect();
        scans.sort_by(|a, b| b.scanned_at.cmp(&a.scanned_at));
        scans.truncate(limit);
        Ok(scans)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[tokio::test]
    async fn test_consume_flips_once() {
        let store = MemoryEntitlementStore::new();
        let ticket_id = Uuid::new_v4();
        store.issue_entitlements(ticket_id, &[day(1)]).await.unwrap();

        let first_at = Utc::now();
        let first = store.consume_entitlement(ticket_id, day(1), first_at).await.unwrap();
        let second = store
            .consume_entitlement(ticket_id, day(1), first_at + chrono::Duration::seconds(5))
            .await
            .unwrap();

        assert!(matches!(first, ConsumeResult::Consumed(ref row) if row.scanned_at == Some(first_at)));
        assert!(matches!(second, ConsumeResult::AlreadyUsed(ref row) if row.scanned_at == Some(first_at)));
        assert_eq!(
            store.consume_entitlement(ticket_id, day(2), first_at).await.unwrap(),
            ConsumeResult::Missing
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_has_single_winner() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let ticket_id = Uuid::new_v4();
        store.issue_entitlements(ticket_id, &[day(1)]).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .consume_entitlement(ticket_id, day(1), Utc::now())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut consumed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ConsumeResult::Consumed(_)) {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 1);
    }

    #[tokio::test]
    async fn test_entitlement_set_never_grows() {
        let store = MemoryEntitlementStore::new();
        let ticket_id = Uuid::new_v4();

        let first = store.issue_entitlements(ticket_id, &[day(2), day(1)]).await.unwrap();
        let second = store.issue_entitlements(ticket_id, &[day(3)]).await.unwrap();

        match first {
            IssueResult::Issued(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].entitlement_date, day(1));
            }
            IssueResult::AlreadyIssued => panic!("first issuance should succeed"),
        }
        assert_eq!(second, IssueResult::AlreadyIssued);
        assert_eq!(store.list_entitlements(ticket_id).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL pointing at a disposable PostgreSQL database"]
    async fn test_postgres_conditional_update_has_single_winner() {
        use crate::models::{event::CreateEventData, ticket::CreateTicketData};

        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let event = Event::create(
            &pool,
            CreateEventData {
                name: "Concurrency Check".to_string(),
                start_date: day(1),
                end_date: day(3),
            },
        )
        .await
        .unwrap();
        let ticket = Ticket::create(
            &pool,
            CreateTicketData {
                event_id: event.id,
                user_id: Uuid::new_v4(),
                ticket_code: format!("PG-{}", Uuid::new_v4()),
            },
        )
        .await
        .unwrap();

        let store = Arc::new(PgEntitlementStore::new(pool));
        store.issue_entitlements(ticket.id, &[day(1), day(2)]).await.unwrap();
        assert_eq!(
            store.issue_entitlements(ticket.id, &[day(3)]).await.unwrap(),
            IssueResult::AlreadyIssued
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .consume_entitlement(ticket.id, day(1), Utc::now())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut consumed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ConsumeResult::Consumed(_) => consumed += 1,
                ConsumeResult::AlreadyUsed(row) => assert!(row.scanned_at.is_some()),
                ConsumeResult::Missing => panic!("entitlement row vanished"),
            }
        }
        assert_eq!(consumed, 1);
        assert_eq!(
            store.consume_entitlement(ticket.id, day(3), Utc::now()).await.unwrap(),
            ConsumeResult::Missing
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_fault() {
        let store = MemoryEntitlementStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.health_check().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.find_ticket_by_code("TKT-1").await.is_err());
    }
}
