use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::entitlement::{Entitlement, EntitlementStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayAttendance {
    pub date: NaiveDate,
    pub status: EntitlementStatus,
    pub scanned_at: Option<DateTime<Utc>>,
}

/// Days used / remaining for one ticket, shown after a scan and on "my tickets"
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSummary {
    pub total_days: usize,
    pub used_days: usize,
    pub remaining_days: usize,
    /// Human readable line, e.g. "Day 2 of 3 used, 1 remaining"
    pub label: String,
    pub days: Vec<DayAttendance>,
}

impl AttendanceSummary {
    pub fn build(entitlements: &[Entitlement]) -> Self {
        let mut days: Vec<DayAttendance> = entitlements
            .iter()
            .map(|e| DayAttendance {
                date: e.entitlement_date,
                status: e.status,
                scanned_at: e.scanned_at,
            })
            .collect();
        days.sort_by_key(|d| d.date);

        let used_days = days
            .iter()
            .filter(|d| d.status == EntitlementStatus::Used)
            .count();

        let total_days = days.len();
        let remaining_days = total_days - used_days;

        Self {
            total_days,
            used_days,
            remaining_days,
            label: label(total_days, used_days, remaining_days),
            days,
        }
    }
}

fn label(total_days: usize, used_days: usize, remaining_days: usize) -> String {
    if total_days == 0 {
        return "No admission days".to_string();
    }

    format!(
        "Day {} of {} used, {} remaining",
        used_days, total_days, remaining_days
    )
}
