use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entitlement_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementStatus {
    Available,
    Used,
}

/// A ticket's right to enter on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Entitlement {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub entitlement_date: NaiveDate,
    pub status: EntitlementStatus,
    pub scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn is_used(&self) -> bool {
        self.status == EntitlementStatus::Used
    }

    /// Lists all entitlements of a ticket, oldest day first
    pub async fn list_by_ticket(pool: &PgPool, ticket_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let entitlements = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM ticket_entitlements
            WHERE ticket_id = $1
            ORDER BY entitlement_date ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(pool)
        .await?;

        Ok(entitlements)
    }

    /// Finds the entitlement of a ticket for one day
    pub async fn find_for_day(
        pool: &PgPool,
        ticket_id: Uuid,
        day: NaiveDate,
    ) -> Result<Option<Self>, sqlx::Error> {
        let entitlement = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM ticket_entitlements
            WHERE ticket_id = $1 AND entitlement_date = $2
            "#,
        )
        .bind(ticket_id)
        .bind(day)
        .fetch_optional(pool)
        .await?;

        Ok(entitlement)
    }

    /// Flips the entitlement for `day` to used, only if it is still available.
    ///
    /// This is a single conditional UPDATE, so of any number of concurrent callers
    /// at most one gets `Some(row)` back. Everybody else gets `None` and must
    /// re-read the row to find out why.
    pub async fn mark_used(
        pool: &PgPool,
        ticket_id: Uuid,
        day: NaiveDate,
        scanned_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let entitlement = sqlx::query_as::<_, Self>(
            r#"
            UPDATE ticket_entitlements
            SET status = 'used', scanned_at = $3
            WHERE ticket_id = $1
              AND entitlement_date = $2
              AND status = 'available'
            RETURNING *
            "#,
        )
        .bind(ticket_id)
        .bind(day)
        .bind(scanned_at)
        .fetch_optional(pool)
        .await?;

        Ok(entitlement)
    }

    /// Inserts the full entitlement set of a ticket.
    ///
    /// Returns `None` without writing anything if the ticket already holds
    /// entitlements: the set is fixed at issuance and never grows.
    pub async fn create_for_ticket(
        pool: &PgPool,
        ticket_id: Uuid,
        days: &[NaiveDate],
    ) -> Result<Option<Vec<Self>>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        // Serialize concurrent issuance for the same ticket
        sqlx::query("SELECT id FROM tickets WHERE id = $1 FOR UPDATE")
            .bind(ticket_id)
            .fetch_optional(&mut *tx)
            .await?;

        let existing = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM ticket_entitlements WHERE ticket_id = $1
            "#,
        )
        .bind(ticket_id)
        .fetch_one(&mut *tx)
        .await?;

        if existing > 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let mut created = Vec::with_capacity(days.len());
        for day in days {
            let entitlement = sqlx::query_as::<_, Self>(
                r#"
                INSERT INTO ticket_entitlements (ticket_id, entitlement_date)
                VALUES ($1, $2)
                RETURNING *
                "#,
            )
            .bind(ticket_id)
            .bind(day)
            .fetch_one(&mut *tx)
            .await?;

            created.push(entitlement);
        }

        tx.commit().await?;

        created.sort_by_key(|e| e.entitlement_date);
        Ok(Some(created))
    }
}
