use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate, // inclusive
    pub end_date: NaiveDate,   // inclusive
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventData {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Event {
    /// Returns true if `date` falls inside the event's active day range
    pub fn is_running_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Every calendar day the event runs, ascending
    pub fn days(&self) -> Vec<NaiveDate> {
        self.start_date
            .iter_days()
            .take_while(|d| *d <= self.end_date)
            .collect()
    }

    /// Create a new event
    pub async fn create(pool: &PgPool, data: CreateEventData) -> Result<Self, sqlx::Error> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (name, start_date, end_date)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(data.name)
        .bind(data.start_date)
        .bind(data.end_date)
        .fetch_one(pool)
        .await?;

        Ok(event)
    }

    /// Find event by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(start: NaiveDate, end: NaiveDate) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: "Harbour Festival".to_string(),
            start_date: start,
            end_date: end,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_range_is_inclusive() {
        let jan = |d| NaiveDate::from_ymd_opt(2025, 1, d).unwrap();
        let event = event(jan(1), jan(3));

        assert!(event.is_running_on(jan(1)));
        assert!(event.is_running_on(jan(3)));
        assert!(!event.is_running_on(jan(4)));
        assert!(!event.is_running_on(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }

    #[test]
    fn test_days_spans_month_boundary() {
        let event = event(
            NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 2).unwrap(),
        );

        let days = event.days();
        assert_eq!(days.len(), 4);
        assert_eq!(days[2], NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
    }
}
