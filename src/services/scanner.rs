use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{entitlement::Entitlement, scan_log::CreateScanLogData, ticket::Ticket};
use crate::services::attendance::AttendanceSummary;
use crate::services::credential::{Credential, CredentialCodec};
use crate::services::entitlement_store::{ConsumeResult, EntitlementStore, StoreError};
use crate::services::scan_engine::{self, Decision, InvalidReason, ScanOutcome, ScanPolicy};

/// Raw payloads longer than this are cut before they reach the audit log
const MAX_LOGGED_PAYLOAD: usize = 2048;

/// Result handed back to the scanning device
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub scan_date: NaiveDate,
    pub scanned_at: DateTime<Utc>,
    /// Present once the credential resolved to a ticket it matches
    pub ticket: Option<Ticket>,
    pub summary: Option<AttendanceSummary>,
}

impl ScanReport {
    fn rejected(outcome: ScanOutcome, scan_date: NaiveDate, scanned_at: DateTime<Utc>) -> Self {
        Self {
            outcome,
            scan_date,
            scanned_at,
            ticket: None,
            summary: None,
        }
    }
}

/// A report plus the ticket the credential resolved to, if any.
///
/// The two differ for credentials that name a known ticket but are rejected as
/// invalid: the device sees no ticket, the audit log still records it.
struct Evaluation {
    report: ScanReport,
    subject: Option<Ticket>,
}

impl Evaluation {
    fn unresolved(outcome: ScanOutcome, scan_date: NaiveDate, scanned_at: DateTime<Utc>) -> Self {
        Self {
            report: ScanReport::rejected(outcome, scan_date, scanned_at),
            subject: None,
        }
    }
}

/// Handles one scan attempt from a gate device.
///
/// Scan outcomes, including every rejection, come back as `Ok`. `Err` means the
/// store failed and the device should retry; it never stands for a decision.
#[tracing::instrument(skip(store, codec, policy, raw_payload), fields(payload_len = raw_payload.len()))]
pub async fn scan(
    store: &dyn EntitlementStore,
    codec: &CredentialCodec,
    policy: &ScanPolicy,
    raw_payload: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<ScanReport, StoreError> {
    let Evaluation { report, subject } =
        evaluate(store, codec, policy, raw_payload, today, now).await?;

    tracing::info!(
        outcome = report.outcome.code(),
        ticket_id = ?subject.as_ref().map(|t| t.id),
        scan_date = %report.scan_date,
        "Scan decided"
    );

    let log = CreateScanLogData {
        ticket_id: subject.as_ref().map(|t| t.id),
        event_id: subject.as_ref().map(|t| t.event_id),
        scan_date: report.scan_date,
        outcome: report.outcome.code().to_string(),
        raw_payload: subject.is_none().then(|| truncate_payload(raw_payload)),
        scanned_at: now,
    };
    if let Err(e) = store.record_scan(log).await {
        // The decision is already committed; losing the audit line must not undo it
        tracing::warn!(error = %e, "Failed to record scan log");
    }

    Ok(report)
}

async fn evaluate(
    store: &dyn EntitlementStore,
    codec: &CredentialCodec,
    policy: &ScanPolicy,
    raw_payload: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Evaluation, StoreError> {
    let Some(credential) = Credential::decode(raw_payload) else {
        tracing::debug!("Unreadable credential payload");
        return Ok(Evaluation::unresolved(
            ScanOutcome::Invalid(InvalidReason::Malformed),
            today,
            now,
        ));
    };

    if !codec.verify(&credential) {
        tracing::warn!(ticket_code = %credential.ticket_code, "Credential signature mismatch");
        return Ok(Evaluation::unresolved(
            ScanOutcome::Invalid(InvalidReason::BadSignature),
            today,
            now,
        ));
    }

    let Some(ticket) = store.find_ticket_by_code(&credential.ticket_code).await? else {
        tracing::warn!(ticket_code = %credential.ticket_code, "Signed credential for unknown ticket");
        return Ok(Evaluation::unresolved(
            ScanOutcome::Invalid(InvalidReason::UnknownTicket),
            today,
            now,
        ));
    };

    let event = store.find_event(ticket.event_id).await?.ok_or_else(|| {
        StoreError::Inconsistent(format!(
            "ticket {} references missing event {}",
            ticket.id, ticket.event_id
        ))
    })?;

    let mut entitlements = store.list_entitlements(ticket.id).await?;

    let outcome = match scan_engine::decide(&credential, &ticket, &event, &entitlements, today, policy) {
        Decision::Reject(ScanOutcome::Invalid(reason)) => {
            tracing::warn!(ticket_id = %ticket.id, reason = ?reason, "Credential rejected for known ticket");
            return Ok(Evaluation {
                report: ScanReport::rejected(ScanOutcome::Invalid(reason), today, now),
                subject: Some(ticket),
            });
        }
        Decision::Reject(outcome) => outcome,
        Decision::Consume { day } => {
            match store.consume_entitlement(ticket.id, day, now).await? {
                ConsumeResult::Consumed(row) => {
                    replace_row(&mut entitlements, &row);
                    ScanOutcome::Accepted(row)
                }
                ConsumeResult::AlreadyUsed(row) => {
                    tracing::info!(ticket_id = %ticket.id, day = %day, "Lost concurrent scan race");
                    replace_row(&mut entitlements, &row);
                    ScanOutcome::AlreadyUsed(row)
                }
                ConsumeResult::Missing => {
                    return Err(StoreError::Inconsistent(format!(
                        "entitlement for ticket {} on {} disappeared during scan",
                        ticket.id, day
                    )));
                }
            }
        }
    };

    Ok(Evaluation {
        report: ScanReport {
            outcome,
            scan_date: today,
            scanned_at: now,
            summary: Some(AttendanceSummary::build(&entitlements)),
            ticket: Some(ticket.clone()),
        },
        subject: Some(ticket),
    })
}

fn replace_row(entitlements: &mut [Entitlement], row: &Entitlement) {
    if let Some(slot) = entitlements
        .iter_mut()
        .find(|e| e.entitlement_date == row.entitlement_date)
    {
        *slot = row.clone();
    }
}

fn truncate_payload(raw: &str) -> String {
    match raw.char_indices().nth(MAX_LOGGED_PAYLOAD) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ticket::TicketStatus;
    use crate::services::testing::{jan, Venue};
    use chrono::Duration;
    use std::sync::Arc;

    async fn scan_on(venue: &Venue, payload: &str, day: NaiveDate) -> ScanReport {
        scan(
            venue.store.as_ref(),
            &venue.codec,
            &ScanPolicy::default(),
            payload,
            day,
            Utc::now(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_two_day_package_over_three_day_event() {
        let venue = Venue::with_days(&[jan(1), jan(2)]).await;

        let first = scan_on(&venue, &venue.qr(jan(1)), jan(1)).await;
        assert_eq!(first.outcome.code(), "ACCEPTED");

        let again = scan_on(&venue, &venue.qr(jan(1)), jan(1)).await;
        assert_eq!(again.outcome.code(), "ALREADY_USED");

        let second_day = scan_on(&venue, &venue.qr(jan(2)), jan(2)).await;
        assert_eq!(second_day.outcome.code(), "ACCEPTED");

        let third_day = scan_on(&venue, &venue.qr(jan(3)), jan(3)).await;
        assert_eq!(third_day.outcome, ScanOutcome::NoEntitlementToday);

        let summary = third_day.summary.unwrap();
        assert_eq!(summary.total_days, 2);
        assert_eq!(summary.used_days, 2);
        assert_eq!(summary.remaining_days, 0);
    }

    #[tokio::test]
    async fn test_rescan_keeps_original_timestamp() {
        let venue = Venue::with_days(&[jan(1)]).await;
        let payload = venue.qr(jan(1));
        let first_at = Utc::now();

        let first = scan(
            venue.store.as_ref(),
            &venue.codec,
            &ScanPolicy::default(),
            &payload,
            jan(1),
            first_at,
        )
        .await
        .unwrap();
        let retry = scan(
            venue.store.as_ref(),
            &venue.codec,
            &ScanPolicy::default(),
            &payload,
            jan(1),
            first_at + Duration::minutes(3),
        )
        .await
        .unwrap();

        assert!(first.outcome.is_accepted());
        match retry.outcome {
            ScanOutcome::AlreadyUsed(row) => assert_eq!(row.scanned_at, Some(first_at)),
            other => panic!("expected ALREADY_USED, got {:?}", other),
        }
        assert_eq!(retry.summary.unwrap().used_days, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scans_accept_exactly_once() {
        let venue = Arc::new(Venue::with_days(&[jan(2)]).await);
        let payload = venue.qr(jan(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let venue = venue.clone();
                let payload = payload.clone();
                tokio::spawn(async move { scan_on(&venue, &payload, jan(2)).await })
            })
            .collect();

        let mut codes = Vec::new();
        for handle in handles {
            codes.push(handle.await.unwrap().outcome.code());
        }
        codes.sort();

        assert_eq!(codes, vec!["ACCEPTED", "ALREADY_USED"]);
        let rows = venue.store.list_entitlements(venue.ticket.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_used());
    }

    #[tokio::test]
    async fn test_cancelled_ticket_never_scans() {
        let venue = Venue::with_days(&[jan(1)]).await;
        venue
            .store
            .set_ticket_status(venue.ticket.id, TicketStatus::Cancelled);

        let report = scan_on(&venue, &venue.qr(jan(1)), jan(1)).await;

        assert_eq!(
            report.outcome,
            ScanOutcome::TicketInactive(TicketStatus::Cancelled)
        );
        let rows = venue.store.list_entitlements(venue.ticket.id).await.unwrap();
        assert!(!rows[0].is_used());
    }

    #[tokio::test]
    async fn test_out_of_range_wins_over_existing_row() {
        // A stray row outside the event span must never admit anyone
        let venue = Venue::with_days(&[jan(4)]).await;

        let report = scan_on(&venue, &venue.qr(jan(3)), jan(4)).await;

        assert_eq!(report.outcome, ScanOutcome::OutOfRange);
    }

    #[tokio::test]
    async fn test_garbage_and_forgeries_are_invalid() {
        let venue = Venue::with_days(&[jan(1)]).await;

        let garbage = scan_on(&venue, "https://example.com/not-a-ticket", jan(1)).await;
        assert_eq!(garbage.outcome, ScanOutcome::Invalid(InvalidReason::Malformed));
        assert!(garbage.ticket.is_none());

        let forged = CredentialCodec::new(b"someone-else")
            .encode(
                venue.ticket.id,
                venue.event.id,
                venue.ticket.user_id,
                &venue.ticket.ticket_code,
                jan(1),
            )
            .unwrap()
            .to_payload()
            .unwrap();
        let report = scan_on(&venue, &forged, jan(1)).await;
        assert_eq!(report.outcome, ScanOutcome::Invalid(InvalidReason::BadSignature));

        let rows = venue.store.list_entitlements(venue.ticket.id).await.unwrap();
        assert!(!rows[0].is_used());
    }

    #[tokio::test]
    async fn test_unknown_ticket_code_is_invalid() {
        let venue = Venue::with_days(&[jan(1)]).await;
        let payload = venue
            .codec
            .encode(
                venue.ticket.id,
                venue.event.id,
                venue.ticket.user_id,
                "NO-SUCH-CODE",
                jan(1),
            )
            .unwrap()
            .to_payload()
            .unwrap();

        let report = scan_on(&venue, &payload, jan(1)).await;

        assert_eq!(report.outcome, ScanOutcome::Invalid(InvalidReason::UnknownTicket));
    }

    #[tokio::test]
    async fn test_store_outage_is_a_fault_not_a_decision() {
        let venue = Venue::with_days(&[jan(1)]).await;
        venue.store.set_unavailable(true);

        let result = scan(
            venue.store.as_ref(),
            &venue.codec,
            &ScanPolicy::default(),
            &venue.qr(jan(1)),
            jan(1),
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_scans_are_written_to_audit_log() {
        let venue = Venue::with_days(&[jan(1)]).await;

        scan_on(&venue, &venue.qr(jan(1)), jan(1)).await;
        scan_on(&venue, &venue.qr(jan(1)), jan(1)).await;

        let logs = venue.store.list_scans(venue.ticket.id, 10).await.unwrap();
        let mut outcomes: Vec<&str> = logs.iter().map(|l| l.outcome.as_str()).collect();
        outcomes.sort();
        assert_eq!(outcomes, vec!["ACCEPTED", "ALREADY_USED"]);
        assert!(logs.iter().all(|l| l.raw_payload.is_none()));
    }

    #[tokio::test]
    async fn test_credential_for_other_event_consumes_nothing() {
        let venue = Venue::with_days(&[jan(1)]).await;
        let payload = venue
            .codec
            .encode(
                venue.ticket.id,
                uuid::Uuid::new_v4(),
                venue.ticket.user_id,
                &venue.ticket.ticket_code,
                jan(1),
            )
            .unwrap()
            .to_payload()
            .unwrap();

        let report = scan_on(&venue, &payload, jan(1)).await;

        assert_eq!(report.outcome, ScanOutcome::Invalid(InvalidReason::TicketMismatch));
        assert!(report.ticket.is_none());
        let rows = venue.store.list_entitlements(venue.ticket.id).await.unwrap();
        assert!(!rows[0].is_used());

        let logs = venue.store.list_scans(venue.ticket.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, "INVALID");
        assert_eq!(logs[0].event_id, Some(venue.event.id));
        assert!(logs[0].raw_payload.is_none());
    }

    #[tokio::test]
    async fn test_stale_replay_is_logged_against_ticket() {
        let venue = Venue::with_days(&[jan(1), jan(3)]).await;
        let strict = ScanPolicy {
            max_credential_skew_days: Some(1),
        };

        let report = scan(
            venue.store.as_ref(),
            &venue.codec,
            &strict,
            &venue.qr(jan(1)),
            jan(3),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcome, ScanOutcome::Invalid(InvalidReason::StaleCredential));
        let logs = venue.store.list_scans(venue.ticket.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].ticket_id, Some(venue.ticket.id));
        assert_eq!(logs[0].scan_date, jan(3));
    }

    #[test]
    fn test_truncate_payload_respects_char_boundaries() {
        let long = "é".repeat(MAX_LOGGED_PAYLOAD + 10);
        assert_eq!(truncate_payload(&long).chars().count(), MAX_LOGGED_PAYLOAD);
        assert_eq!(truncate_payload("short"), "short");
    }
}
