use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Lifecycle status of a ticket, owned by order/cancellation logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Active,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTicketData {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
}

impl Ticket {
    pub fn is_active(&self) -> bool {
        self.status == TicketStatus::Active
    }

    /// Creates a new active ticket
    pub async fn create(pool: &PgPool, data: CreateTicketData) -> Result<Self, sqlx::Error> {
        let ticket = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO tickets (event_id, user_id, ticket_code)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(data.event_id)
        .bind(data.user_id)
        .bind(&data.ticket_code)
        .fetch_one(pool)
        .await?;

        Ok(ticket)
    }

    /// Finds a ticket by its internal ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let ticket = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM tickets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(ticket)
    }

    /// Finds a ticket by the code printed on it (and embedded in its credentials)
    pub async fn find_by_code(pool: &PgPool, ticket_code: &str) -> Result<Option<Self>, sqlx::Error> {
        let ticket = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM tickets WHERE ticket_code = $1
            "#,
        )
        .bind(ticket_code)
        .fetch_optional(pool)
        .await?;

        Ok(ticket)
    }
}
