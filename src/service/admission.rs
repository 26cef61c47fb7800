use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::{AppError, AppResult};
use crate::service::ledger::AttendanceLedger;
use crate::utils::keyed_lock::{KeyedSlots, SlotGuard};

/// Proof that the holder passed the admission gate for `(user_id, day)`.
/// The user's slot stays held until the ticket is dropped.
pub struct AdmissionTicket {
    user_id: u64,
    day: NaiveDate,
    _slot: SlotGuard<u64>,
}

impl AdmissionTicket {
    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("user_id", &self.user_id)
            .field("day", &self.day)
            .finish()
    }
}

/// Serializes session creation per user. Check-ins for different users never
/// wait on each other.
pub struct CheckInDeduplicator {
    slots: KeyedSlots<u64>,
    ledger: Arc<AttendanceLedger>,
    wait: Duration,
}

impl CheckInDeduplicator {
    pub fn new(ledger: Arc<AttendanceLedger>, wait: Duration) -> Self {
        Self {
            slots: KeyedSlots::new(),
            ledger,
            wait,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn admit_check_in(&self, user_id: u64, day: NaiveDate) -> AppResult<AdmissionTicket> {
        self.ensure_no_record(user_id, day).await?;

        let Some(slot) = self.slots.acquire_within(user_id, self.wait).await else {
            tracing::warn!(user_id, wait_ms = self.wait.as_millis() as u64, "Admission wait timed out");
            return Err(AppError::AdmissionTimeout);
        };

        // an earlier holder may have committed while we queued
        self.ensure_no_record(user_id, day).await?;

        Ok(AdmissionTicket {
            user_id,
            day,
            _slot: slot,
        })
    }

    async fn ensure_no_record(&self, user_id: u64, day: NaiveDate) -> AppResult<()> {
        match self.ledger.record_for_day(user_id, day).await? {
            Some(existing) => Err(AppError::DuplicateSession {
                existing_check_in_time: existing.check_in_time,
            }),
            None => Ok(()),
        }
    }

    pub fn is_admitting(&self, user_id: u64) -> bool {
        self.slots.is_held(&user_id)
    }

    pub fn active_slots(&self) -> usize {
        self.slots.active_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::ApprovalStatus;
    use crate::service::fixtures::{Harness, at_hms, session};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_check_ins_create_one_record() {
        let h = Arc::new(Harness::new().await);
        h.store.set_insert_delay(Duration::from_millis(20));
        let day = h.ledger.work_date(at_hms(3, 0, 0));

        let mut tasks = Vec::new();
        for i in 0..8u32 {
            let h = Arc::clone(&h);
            tasks.push(tokio::spawn(async move {
                let ticket = h.admission.admit_check_in(h.staff_id, day).await?;
                h.ledger
                    .open_session(&ticket, session(ApprovalStatus::Normal, at_hms(3, 0, i)))
                    .await
            }));
        }

        let mut opened = 0;
        let mut duplicates = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => opened += 1,
                Err(AppError::DuplicateSession { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(h.store.records_for(h.staff_id, day).await.len(), 1);
        // the store saw one insert; everyone else was turned away at the gate
        assert_eq!(h.store.insert_call_count(), 1);
        assert_eq!(h.admission.active_slots(), 0);
    }

    #[tokio::test]
    async fn slot_is_released_when_the_insert_fails() {
        let h = Harness::new().await;
        let day = h.ledger.work_date(at_hms(3, 0, 0));
        h.store.fail_operation("insert_record", true);

        {
            let ticket = h.admission.admit_check_in(h.staff_id, day).await.unwrap();
            let err = h
                .ledger
                .open_session(&ticket, session(ApprovalStatus::Normal, at_hms(3, 0, 0)))
                .await
                .unwrap_err();
            assert!(err.is_transient());
            assert!(h.admission.is_admitting(h.staff_id));
        }
        assert!(!h.admission.is_admitting(h.staff_id));

        h.store.fail_operation("insert_record", false);
        let ticket = h.admission.admit_check_in(h.staff_id, day).await.unwrap();
        h.ledger
            .open_session(&ticket, session(ApprovalStatus::Normal, at_hms(3, 1, 0)))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_past_the_limit_is_a_transient_error() {
        let h = Harness::new().await;
        let day = h.ledger.work_date(at_hms(3, 0, 0));
        let _held = h.admission.admit_check_in(h.staff_id, day).await.unwrap();

        let err = h.admission.admit_check_in(h.staff_id, day).await.unwrap_err();
        assert!(matches!(err, AppError::AdmissionTimeout));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let h = Harness::new().await;
        let day = h.ledger.work_date(at_hms(3, 0, 0));
        let _a = h.admission.admit_check_in(h.staff_id, day).await.unwrap();
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            h.admission.admit_check_in(h.peer_id, day),
        )
        .await;
        assert!(matches!(b, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn committed_record_short_circuits_before_the_slot() {
        let h = Harness::new().await;
        let rec = h.open(h.staff_id, ApprovalStatus::Normal, at_hms(3, 0, 0)).await.unwrap();

        let err = h.admission.admit_check_in(h.staff_id, rec.work_date).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::DuplicateSession { existing_check_in_time } if existing_check_in_time == rec.check_in_time
        ));
        assert_eq!(h.admission.active_slots(), 0);
    }
}
