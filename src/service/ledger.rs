use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, DeviceClass, NewAttendanceRecord, SessionClose},
    audit::AuditAction,
    location::ReportedLocation,
};
use crate::service::{admission::AdmissionTicket, audit::AuditTrail};
use crate::store::{AttendanceStore, InsertOutcome};

/// Hours between check-in and check-out, rounded to 2 decimals.
///
/// A check-out earlier than the check-in yields 0 and `true` so the record
/// can be flagged.
pub fn work_hours_between(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> (f64, bool) {
    let millis = (check_out - check_in).num_milliseconds();
    if millis < 0 {
        return (0.0, true);
    }
    let hours = millis as f64 / 3_600_000.0;
    ((hours * 100.0).round() / 100.0, false)
}

#[derive(Debug, Clone)]
pub struct OpenSession {
    pub check_in_time: DateTime<Utc>,
    pub location: ReportedLocation,
    pub device_class: DeviceClass,
    pub approval_status: ApprovalStatus,
    pub on_official_duty: bool,
}

/// Source of truth for attendance sessions.
pub struct AttendanceLedger {
    store: Arc<dyn AttendanceStore>,
    audit: AuditTrail,
    day_offset: FixedOffset,
}

impl AttendanceLedger {
    pub fn new(store: Arc<dyn AttendanceStore>, audit: AuditTrail, day_offset: FixedOffset) -> Self {
        Self {
            store,
            audit,
            day_offset,
        }
    }

    /// Calendar day an instant belongs to, in the attendance timezone.
    pub fn work_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.day_offset).date_naive()
    }

    pub async fn record(&self, id: u64) -> AppResult<Option<AttendanceRecord>> {
        Ok(self.store.record(id).await?)
    }

    pub async fn record_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> AppResult<Option<AttendanceRecord>> {
        Ok(self.store.record_for_day(user_id, day).await?)
    }

    /// Opens the day's session for the ticket holder. The store re-checks the
    /// one-record-per-day rule atomically, independent of the admission gate.
    pub async fn open_session(
        &self,
        ticket: &AdmissionTicket,
        session: OpenSession,
    ) -> AppResult<AttendanceRecord> {
        let new = NewAttendanceRecord {
            user_id: ticket.user_id(),
            work_date: ticket.day(),
            check_in_time: session.check_in_time,
            check_in_location: session.location,
            device_class: session.device_class,
            approval_status: session.approval_status,
            on_official_duty_outside_premises: session.on_official_duty,
        };

        match self.store.insert_record(new).await {
            Ok(InsertOutcome::Inserted(record)) => {
                tracing::info!(
                    record_id = record.id,
                    user_id = record.user_id,
                    status = %record.approval_status,
                    "Attendance session opened"
                );
                Ok(record)
            }
            Ok(InsertOutcome::Existing(existing)) => {
                tracing::warn!(
                    user_id = existing.user_id,
                    record_id = existing.id,
                    "Ledger refused a second session for the day"
                );
                Err(AppError::DuplicateSession {
                    existing_check_in_time: existing.check_in_time,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, user_id = ticket.user_id(), "Opening attendance session failed");
                Err(e.into())
            }
        }
    }

    pub async fn close_session(
        &self,
        record_id: u64,
        check_out_time: DateTime<Utc>,
        location: Option<ReportedLocation>,
    ) -> AppResult<AttendanceRecord> {
        let record = self
            .store
            .record(record_id)
            .await?
            .ok_or(AppError::NoOpenSession)?;
        Self::ensure_closable(&record)?;

        let (work_hours, clock_skew_flagged) =
            work_hours_between(record.check_in_time, check_out_time);
        let close = SessionClose {
            check_out_time,
            check_out_location: location,
            work_hours,
            clock_skew_flagged,
        };

        let Some(closed) = self.store.close_record(record_id, close).await? else {
            // state moved between the read and the write; report what it is now
            let current = self.store.record(record_id).await?;
            return match current {
                Some(r) => {
                    Self::ensure_closable(&r)?;
                    Err(AppError::NoOpenSession)
                }
                None => Err(AppError::NoOpenSession),
            };
        };

        if clock_skew_flagged {
            tracing::warn!(
                record_id,
                check_in = %record.check_in_time,
                check_out = %check_out_time,
                "Check-out precedes check-in; work hours clamped to 0"
            );
            self.audit
                .record(
                    Some(closed.user_id),
                    AuditAction::ClockSkewClamped,
                    "attendance_record",
                    Some(record_id),
                    json!({
                        "check_in_time": record.check_in_time,
                        "check_out_time": check_out_time,
                    }),
                    check_out_time,
                )
                .await;
        }

        tracing::info!(record_id, user_id = closed.user_id, work_hours, "Attendance session closed");
        Ok(closed)
    }

    fn ensure_closable(record: &AttendanceRecord) -> AppResult<()> {
        if !record.is_open() || record.approval_status == ApprovalStatus::RejectedOffpremises {
            return Err(AppError::NoOpenSession);
        }
        if record.approval_status == ApprovalStatus::PendingSupervisorApproval {
            return Err(AppError::NotApproved {
                record_id: record.id,
            });
        }
        Ok(())
    }

    /// Turns a provisional record into a countable off-premises one.
    pub async fn approve_provisional(&self, record_id: u64) -> AppResult<Option<AttendanceRecord>> {
        let promoted = self
            .store
            .update_record_status(
                record_id,
                ApprovalStatus::PendingSupervisorApproval,
                ApprovalStatus::ApprovedOffpremises,
                true,
            )
            .await?;
        if !promoted {
            return Ok(None);
        }
        match self.store.record(record_id).await {
            Ok(record) => Ok(record),
            Err(e) => {
                // a promoted record must not outlive a failed approval
                if let Err(undo) = self.demote_to_provisional(record_id).await {
                    tracing::error!(error = %undo, record_id, "Could not demote record after failed re-read");
                }
                Err(e.into())
            }
        }
    }

    /// Undo of `approve_provisional` when the approval cannot be completed.
    pub async fn demote_to_provisional(&self, record_id: u64) -> AppResult<bool> {
        Ok(self
            .store
            .update_record_status(
                record_id,
                ApprovalStatus::ApprovedOffpremises,
                ApprovalStatus::PendingSupervisorApproval,
                false,
            )
            .await?)
    }

    /// Drops a provisional record that will never be countable.
    pub async fn discard_provisional(&self, record_id: u64) -> AppResult<bool> {
        let deleted = self
            .store
            .delete_record(record_id, ApprovalStatus::PendingSupervisorApproval)
            .await?;
        if deleted {
            tracing::info!(record_id, "Provisional attendance record discarded");
        }
        Ok(deleted)
    }

    /// Hard delete of a record created by an off-premises approval. Refuses
    /// any record that is not `approved_offpremises`.
    pub async fn revert_approved_offpremises(&self, record_id: u64) -> AppResult<bool> {
        let deleted = self
            .store
            .delete_record(record_id, ApprovalStatus::ApprovedOffpremises)
            .await?;
        if deleted {
            tracing::info!(record_id, "Approved off-premises record reverted");
        } else {
            tracing::warn!(record_id, "Revert found no approved off-premises record to delete");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures::{Harness, at_hms};

    #[test]
    fn work_hours_round_to_two_decimals() {
        let start = at_hms(3, 0, 0);
        assert_eq!(work_hours_between(start, at_hms(11, 20, 0)), (8.33, false));
        assert_eq!(work_hours_between(start, at_hms(3, 0, 0)), (0.0, false));
        assert_eq!(work_hours_between(start, at_hms(2, 59, 0)), (0.0, true));
    }

    #[test]
    fn work_date_follows_configured_offset() {
        let h = Harness::with_offset_minutes(6 * 60);
        // 20:30 UTC is already the next day at UTC+6
        let late = at_hms(20, 30, 0);
        assert_eq!(h.ledger.work_date(late), late.date_naive().succ_opt().unwrap());
    }

    #[tokio::test]
    async fn second_session_for_the_day_is_refused() {
        let h = Harness::new().await;
        let first = h.open(h.staff_id, ApprovalStatus::Normal, at_hms(3, 0, 0)).await.unwrap();

        let err = h
            .open(h.staff_id, ApprovalStatus::Normal, at_hms(4, 0, 0))
            .await
            .unwrap_err();
        match err {
            AppError::DuplicateSession {
                existing_check_in_time,
            } => assert_eq!(existing_check_in_time, first.check_in_time),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_record_cannot_be_closed() {
        let h = Harness::new().await;
        let rec = h
            .open(h.staff_id, ApprovalStatus::PendingSupervisorApproval, at_hms(3, 0, 0))
            .await
            .unwrap();

        let err = h
            .ledger
            .close_session(rec.id, at_hms(11, 0, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotApproved { record_id } if record_id == rec.id));
        assert!(h.ledger.record(rec.id).await.unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn closing_twice_reports_no_open_session() {
        let h = Harness::new().await;
        let rec = h.open(h.staff_id, ApprovalStatus::Normal, at_hms(3, 0, 0)).await.unwrap();

        let closed = h.ledger.close_session(rec.id, at_hms(11, 30, 0), None).await.unwrap();
        assert_eq!(closed.work_hours, Some(8.5));

        let err = h.ledger.close_session(rec.id, at_hms(12, 0, 0), None).await.unwrap_err();
        assert!(matches!(err, AppError::NoOpenSession));
    }

    #[tokio::test]
    async fn clock_skew_is_clamped_and_audited() {
        let h = Harness::new().await;
        let rec = h.open(h.staff_id, ApprovalStatus::Normal, at_hms(9, 0, 0)).await.unwrap();

        let closed = h.ledger.close_session(rec.id, at_hms(8, 0, 0), None).await.unwrap();
        assert_eq!(closed.work_hours, Some(0.0));
        assert!(closed.clock_skew_flagged);

        let events = h.store.audit_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::ClockSkewClamped);
    }

    #[tokio::test]
    async fn revert_only_deletes_approved_offpremises_records() {
        let h = Harness::new().await;
        let rec = h.open(h.staff_id, ApprovalStatus::Normal, at_hms(3, 0, 0)).await.unwrap();
        assert!(!h.ledger.revert_approved_offpremises(rec.id).await.unwrap());
        assert!(h.ledger.record(rec.id).await.unwrap().is_some());

        let other = h
            .open(h.peer_id, ApprovalStatus::PendingSupervisorApproval, at_hms(3, 0, 0))
            .await
            .unwrap();
        let approved = h.ledger.approve_provisional(other.id).await.unwrap().unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::ApprovedOffpremises);
        assert!(approved.on_official_duty_outside_premises);
        assert!(h.ledger.revert_approved_offpremises(other.id).await.unwrap());
        assert!(h.ledger.record(other.id).await.unwrap().is_none());
    }
}
