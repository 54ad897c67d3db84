use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanLog {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>, // nullable: invalid scans may not resolve a ticket
    pub event_id: Option<Uuid>,
    pub scan_date: NaiveDate,
    pub outcome: String, // ScanOutcome::code()
    pub raw_payload: Option<String>, // kept for scans that never resolved a ticket
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScanLogData {
    pub ticket_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub scan_date: NaiveDate,
    pub outcome: String,
    pub raw_payload: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

impl ScanLog {
    /// Appends a scan attempt to the audit log
    pub async fn create(pool: &PgPool, data: CreateScanLogData) -> Result<Self, sqlx::Error> {
        let log = sqlx::query_as::<_, ScanLog>(
            r#"
            INSERT INTO scan_logs (ticket_id, event_id, scan_date, outcome, raw_payload, scanned_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.ticket_id)
        .bind(data.event_id)
        .bind(data.scan_date)
        .bind(data.outcome)
        .bind(data.raw_payload)
        .bind(data.scanned_at)
        .fetch_one(pool)
        .await?;

        Ok(log)
    }

    /// Lists scan attempts for a ticket, newest first
    pub async fn list_by_ticket(
        pool: &PgPool,
        ticket_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let logs = sqlx::query_as::<_, ScanLog>(
            r#"
            SELECT * FROM scan_logs
            WHERE ticket_id = $1
            ORDER BY scanned_at DESC
            LIMIT $2
            "#,
        )
        .bind(ticket_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(logs)
    }
}
