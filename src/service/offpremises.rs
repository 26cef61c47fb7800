use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, DeviceClass},
    audit::AuditAction,
    location::ReportedLocation,
    offpremises::{NewOffPremisesRequest, OffPremisesRequest, RequestAction, RequestTransition},
};
use crate::service::{
    admission::CheckInDeduplicator,
    audit::AuditTrail,
    ledger::{AttendanceLedger, OpenSession},
    notify::{Notification, NotificationKind, NotificationSink},
    Caller,
};
use crate::store::AttendanceStore;
use crate::utils::keyed_lock::{KeyedSlots, SlotGuard};

const SUBJECT: &str = "off_premises_request";

#[derive(Debug, Clone)]
pub struct SubmitOffPremises {
    pub location: ReportedLocation,
    pub device_class: DeviceClass,
    pub device_info: Option<String>,
    pub reason: Option<String>,
}

/// How a request's linked record came to be approved, so a failed approval
/// can be undone the same way.
enum ApprovedRecord {
    Promoted(AttendanceRecord),
    Opened(AttendanceRecord),
}

impl ApprovedRecord {
    fn record(&self) -> &AttendanceRecord {
        match self {
            ApprovedRecord::Promoted(r) | ApprovedRecord::Opened(r) => r,
        }
    }
}

/// Pending → Approved | Rejected, Approved → Pending (revert).
///
/// Transitions on one request run one at a time under a per-request slot and
/// are additionally conditional on the stored status, so a decision made on a
/// stale read is refused rather than applied.
pub struct OffPremisesWorkflow {
    store: Arc<dyn AttendanceStore>,
    ledger: Arc<AttendanceLedger>,
    admission: Arc<CheckInDeduplicator>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationSink>,
    slots: KeyedSlots<u64>,
    slot_wait: Duration,
    provisional_records: bool,
}

impl OffPremisesWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        ledger: Arc<AttendanceLedger>,
        admission: Arc<CheckInDeduplicator>,
        audit: AuditTrail,
        notifier: Arc<dyn NotificationSink>,
        slot_wait: Duration,
        provisional_records: bool,
    ) -> Self {
        Self {
            store,
            ledger,
            admission,
            audit,
            notifier,
            slots: KeyedSlots::new(),
            slot_wait,
            provisional_records,
        }
    }

    /// Files a request for the caller's day. The caller has already been
    /// classified off-site.
    #[tracing::instrument(skip(self, input), fields(user_id = caller.user_id))]
    pub async fn submit(
        &self,
        caller: &Caller,
        input: SubmitOffPremises,
        at: DateTime<Utc>,
    ) -> AppResult<OffPremisesRequest> {
        let user_id = caller.user_id;
        let day = self.ledger.work_date(at);
        self.ensure_no_pending(user_id, day).await?;

        // the gate also serializes concurrent submits of one user
        let ticket = self.admission.admit_check_in(user_id, day).await?;
        self.ensure_no_pending(user_id, day).await?;

        let provisional = if self.provisional_records {
            let session = OpenSession {
                check_in_time: at,
                location: input.location.clone(),
                device_class: input.device_class,
                approval_status: ApprovalStatus::PendingSupervisorApproval,
                on_official_duty: false,
            };
            Some(self.ledger.open_session(&ticket, session).await?)
        } else {
            None
        };

        let new = NewOffPremisesRequest {
            user_id,
            work_date: day,
            reported_location: input.location,
            device_info: input.device_info,
            device_class: input.device_class,
            reason: input.reason,
            linked_attendance_record_id: provisional.as_ref().map(|r| r.id),
            created_at: at,
        };
        let request = match self.store.insert_request(new).await {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, user_id, "Storing off-premises request failed");
                if let Some(record) = &provisional {
                    if let Err(undo) = self.ledger.discard_provisional(record.id).await {
                        tracing::error!(
                            error = %undo,
                            record_id = record.id,
                            "Provisional record left behind after failed submit"
                        );
                    }
                }
                return Err(e.into());
            }
        };
        drop(ticket);

        tracing::info!(
            request_id = request.id,
            user_id,
            provisional_record_id = request.linked_attendance_record_id,
            "Off-premises request submitted"
        );

        let department_id = self
            .store
            .staff_profile(user_id)
            .await
            .ok()
            .flatten()
            .and_then(|p| p.department_id)
            .or(caller.department_id);
        match self.store.approvers_for(department_id).await {
            Ok(approvers) => {
                for approver_id in approvers.into_iter().filter(|id| *id != user_id) {
                    self.send(approver_id, NotificationKind::Submitted, &request, at);
                }
            }
            Err(e) => tracing::warn!(error = %e, request_id = request.id, "Could not resolve approvers to notify"),
        }

        Ok(request)
    }

    async fn ensure_no_pending(&self, user_id: u64, day: chrono::NaiveDate) -> AppResult<()> {
        match self.store.pending_request_for_day(user_id, day).await? {
            Some(pending) => Err(AppError::PendingApproval {
                request_id: pending.id,
            }),
            None => Ok(()),
        }
    }

    #[tracing::instrument(skip(self), fields(approver_id = caller.user_id))]
    pub async fn approve(
        &self,
        caller: &Caller,
        request_id: u64,
        at: DateTime<Utc>,
    ) -> AppResult<OffPremisesRequest> {
        let (_slot, request) = self.begin(caller, request_id, RequestAction::Approve).await?;

        let mut updated = self
            .transition(
                request_id,
                RequestTransition::Approve {
                    approver_id: caller.user_id,
                    at,
                },
                RequestAction::Approve,
            )
            .await?;

        let approved = match self.approve_record(&request).await {
            Ok(approved) => approved,
            Err(e) => {
                tracing::warn!(error = %e, request_id, "Approval side effect failed; reopening request");
                self.compensate(request_id, RequestTransition::Reopen { from: updated.status })
                    .await;
                return Err(e);
            }
        };

        let record_id = approved.record().id;
        if let Err(e) = self.store.link_record(request_id, Some(record_id)).await {
            tracing::error!(error = %e, request_id, record_id, "Linking approved record failed; undoing approval");
            self.undo_approved_record(&approved).await;
            self.compensate(request_id, RequestTransition::Reopen { from: updated.status })
                .await;
            return Err(e.into());
        }
        updated.linked_attendance_record_id = Some(record_id);

        tracing::info!(request_id, record_id, approver_id = caller.user_id, "Off-premises request approved");
        self.audit
            .record(
                Some(caller.user_id),
                AuditAction::OffPremisesApproved,
                SUBJECT,
                Some(request_id),
                json!({ "record_id": record_id, "requester_id": request.user_id }),
                at,
            )
            .await;
        self.send(request.user_id, NotificationKind::Approved, &updated, at);
        Ok(updated)
    }

    /// Promotes the provisional record, or opens the day's record when there
    /// is none.
    async fn approve_record(&self, request: &OffPremisesRequest) -> AppResult<ApprovedRecord> {
        if let Some(record_id) = request.linked_attendance_record_id {
            if let Some(record) = self.ledger.approve_provisional(record_id).await? {
                return Ok(ApprovedRecord::Promoted(record));
            }
            tracing::warn!(
                request_id = request.id,
                record_id,
                "Linked record was not provisional; opening a new one"
            );
        }

        let ticket = self
            .admission
            .admit_check_in(request.user_id, request.work_date)
            .await?;
        let session = OpenSession {
            check_in_time: request.created_at,
            location: request.reported_location.clone(),
            device_class: request.device_class,
            approval_status: ApprovalStatus::ApprovedOffpremises,
            on_official_duty: true,
        };
        let record = self.ledger.open_session(&ticket, session).await?;
        Ok(ApprovedRecord::Opened(record))
    }

    async fn undo_approved_record(&self, approved: &ApprovedRecord) {
        let outcome = match approved {
            ApprovedRecord::Promoted(r) => self.ledger.demote_to_provisional(r.id).await,
            ApprovedRecord::Opened(r) => self.ledger.revert_approved_offpremises(r.id).await,
        };
        if let Err(e) = outcome {
            tracing::error!(
                error = %e,
                record_id = approved.record().id,
                "Could not undo approved record"
            );
        }
    }

    #[tracing::instrument(skip(self, reason), fields(approver_id = caller.user_id))]
    pub async fn reject(
        &self,
        caller: &Caller,
        request_id: u64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> AppResult<OffPremisesRequest> {
        ensure_approver(caller)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("a rejection reason is required"));
        }

        let (_slot, request) = self.begin(caller, request_id, RequestAction::Reject).await?;
        let mut updated = self
            .transition(
                request_id,
                RequestTransition::Reject {
                    reason: reason.to_owned(),
                },
                RequestAction::Reject,
            )
            .await?;

        if let Some(record_id) = request.linked_attendance_record_id {
            match self.ledger.discard_provisional(record_id).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(request_id, record_id, "No provisional record to discard"),
                Err(e) => {
                    tracing::warn!(error = %e, request_id, "Discarding provisional record failed; reopening request");
                    self.compensate(request_id, RequestTransition::Reopen { from: updated.status })
                        .await;
                    return Err(e);
                }
            }
            if let Err(e) = self.store.link_record(request_id, None).await {
                tracing::error!(error = %e, request_id, record_id, "Clearing link of discarded record failed");
            }
            updated.linked_attendance_record_id = None;
        }

        tracing::info!(request_id, approver_id = caller.user_id, "Off-premises request rejected");
        self.audit
            .record(
                Some(caller.user_id),
                AuditAction::OffPremisesRejected,
                SUBJECT,
                Some(request_id),
                json!({ "reason": reason, "requester_id": request.user_id }),
                at,
            )
            .await;
        self.send(request.user_id, NotificationKind::Rejected, &updated, at);
        Ok(updated)
    }

    /// Approved back to pending; the record created by the approval is
    /// deleted. Always audited.
    #[tracing::instrument(skip(self), fields(approver_id = caller.user_id))]
    pub async fn revert(
        &self,
        caller: &Caller,
        request_id: u64,
        at: DateTime<Utc>,
    ) -> AppResult<OffPremisesRequest> {
        let (_slot, request) = self.begin(caller, request_id, RequestAction::Revert).await?;
        let updated = self
            .transition(request_id, RequestTransition::Revert, RequestAction::Revert)
            .await?;

        if let Some(record_id) = request.linked_attendance_record_id {
            match self.ledger.revert_approved_offpremises(record_id).await {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, request_id, "Deleting approved record failed; restoring approval");
                    let restore = RequestTransition::Approve {
                        approver_id: request.approved_by_id.unwrap_or(caller.user_id),
                        at: request.approved_at.unwrap_or(at),
                    };
                    self.compensate(request_id, restore).await;
                    if let Err(link) = self.store.link_record(request_id, Some(record_id)).await {
                        tracing::error!(error = %link, request_id, record_id, "Restoring record link failed");
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            request_id,
            record_id = request.linked_attendance_record_id,
            approver_id = caller.user_id,
            "Off-premises approval reverted"
        );
        self.audit
            .record(
                Some(caller.user_id),
                AuditAction::OffPremisesReverted,
                SUBJECT,
                Some(request_id),
                json!({
                    "record_id": request.linked_attendance_record_id,
                    "previous_approver_id": request.approved_by_id,
                    "previous_approved_at": request.approved_at,
                    "requester_id": request.user_id,
                }),
                at,
            )
            .await;
        self.send(request.user_id, NotificationKind::Reverted, &updated, at);
        Ok(updated)
    }

    /// Visible to the requester and to approvers in scope.
    pub async fn get(&self, caller: &Caller, request_id: u64) -> AppResult<OffPremisesRequest> {
        let request = self.load(request_id).await?;
        if request.user_id != caller.user_id {
            ensure_approver(caller)?;
            self.ensure_scope(caller, &request).await?;
        }
        Ok(request)
    }

    pub async fn list_pending(&self, caller: &Caller) -> AppResult<Vec<OffPremisesRequest>> {
        ensure_approver(caller)?;
        if caller.role.has_global_scope() {
            return Ok(self.store.pending_requests(None).await?);
        }
        match caller.department_id {
            Some(dept) => Ok(self.store.pending_requests(Some(dept)).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Role check, slot, load, scope check, state check; in that order.
    async fn begin(
        &self,
        caller: &Caller,
        request_id: u64,
        action: RequestAction,
    ) -> AppResult<(SlotGuard<u64>, OffPremisesRequest)> {
        ensure_approver(caller)?;

        let Some(slot) = self.slots.acquire_within(request_id, self.slot_wait).await else {
            tracing::warn!(request_id, "Timed out waiting for request slot");
            return Err(AppError::AdmissionTimeout);
        };

        let request = self.load(request_id).await?;
        self.ensure_scope(caller, &request).await?;

        if request.status != action.required_status() {
            tracing::warn!(request_id, current = %request.status, requested = %action, "Refused transition");
            return Err(AppError::InvalidStateTransition {
                current: request.status,
                requested: action,
            });
        }
        Ok((slot, request))
    }

    async fn load(&self, request_id: u64) -> AppResult<OffPremisesRequest> {
        self.store
            .request(request_id)
            .await?
            .ok_or(AppError::NotFound {
                entity: SUBJECT,
                id: request_id,
            })
    }

    async fn ensure_scope(&self, caller: &Caller, request: &OffPremisesRequest) -> AppResult<()> {
        if caller.role.has_global_scope() {
            return Ok(());
        }
        let requester_dept = self
            .store
            .staff_profile(request.user_id)
            .await?
            .and_then(|p| p.department_id);
        match (caller.department_id, requester_dept) {
            (Some(mine), Some(theirs)) if mine == theirs => Ok(()),
            _ => {
                tracing::warn!(
                    approver_id = caller.user_id,
                    request_id = request.id,
                    "Approver outside requester's department"
                );
                Err(AppError::forbidden(
                    "request belongs to a user outside your department",
                ))
            }
        }
    }

    async fn transition(
        &self,
        request_id: u64,
        transition: RequestTransition,
        action: RequestAction,
    ) -> AppResult<OffPremisesRequest> {
        if let Some(updated) = self.store.transition_request(request_id, &transition).await? {
            return Ok(updated);
        }
        // another writer got there first
        let current = self.load(request_id).await?;
        Err(AppError::InvalidStateTransition {
            current: current.status,
            requested: action,
        })
    }

    async fn compensate(&self, request_id: u64, transition: RequestTransition) {
        match self.store.transition_request(request_id, &transition).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::error!(request_id, ?transition, "Compensating transition found unexpected state"),
            Err(e) => tracing::error!(error = %e, request_id, ?transition, "Compensating transition failed"),
        }
    }

    fn send(&self, recipient_id: u64, kind: NotificationKind, request: &OffPremisesRequest, at: DateTime<Utc>) {
        self.notifier.notify(Notification {
            recipient_id,
            kind,
            request_id: request.id,
            requester_id: request.user_id,
            at,
        });
    }
}

fn ensure_approver(caller: &Caller) -> AppResult<()> {
    if caller.role.is_approver() {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "role {} cannot review off-premises requests",
            caller.role
        )))
    }
}
