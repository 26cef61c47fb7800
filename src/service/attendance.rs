use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, DeviceClass},
    location::{AssignedLocation, ReportedLocation},
    offpremises::OffPremisesRequest,
};
use crate::service::{
    admission::CheckInDeduplicator,
    ledger::{AttendanceLedger, OpenSession},
    offpremises::{OffPremisesWorkflow, SubmitOffPremises},
    proximity::Direction,
    resolver::{Classification, LocationResolver},
    Caller,
};
use crate::store::AttendanceStore;

#[derive(Debug, Clone)]
pub struct PositionReport {
    pub location: ReportedLocation,
    pub device_class: DeviceClass,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckInOutcome {
    CheckedIn {
        record: AttendanceRecord,
        classification: Classification,
    },
    /// Outside the geofence; the client should file an off-premises request.
    OffPremisesRequired { classification: Classification },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TodayView {
    #[schema(example = "2026-01-05", format = "date", value_type = String)]
    pub work_date: NaiveDate,
    #[schema(nullable = true)]
    pub record: Option<AttendanceRecord>,
    #[schema(nullable = true)]
    pub pending_request: Option<OffPremisesRequest>,
}

/// Check-in, check-out and off-premises submission for the calling user.
pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    ledger: Arc<AttendanceLedger>,
    admission: Arc<CheckInDeduplicator>,
    resolver: Arc<LocationResolver>,
    workflow: Arc<OffPremisesWorkflow>,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        ledger: Arc<AttendanceLedger>,
        admission: Arc<CheckInDeduplicator>,
        resolver: Arc<LocationResolver>,
        workflow: Arc<OffPremisesWorkflow>,
    ) -> Self {
        Self {
            store,
            ledger,
            admission,
            resolver,
            workflow,
        }
    }

    #[tracing::instrument(skip(self, report), fields(user_id = caller.user_id))]
    pub async fn check_in(
        &self,
        caller: &Caller,
        report: PositionReport,
        at: DateTime<Utc>,
    ) -> AppResult<CheckInOutcome> {
        report.location.validate()?;
        let user_id = caller.user_id;
        let day = self.ledger.work_date(at);

        if let Some(existing) = self.ledger.record_for_day(user_id, day).await? {
            return Err(AppError::DuplicateSession {
                existing_check_in_time: existing.check_in_time,
            });
        }
        if let Some(pending) = self.store.pending_request_for_day(user_id, day).await? {
            return Err(AppError::PendingApproval {
                request_id: pending.id,
            });
        }

        let assigned = self.assigned_location(user_id).await?;
        let classification = self
            .resolver
            .classify(
                assigned.as_ref(),
                report.location.coordinate,
                report.device_class,
                Direction::CheckIn,
            )
            .await?;

        if !classification.is_on_site() {
            tracing::info!(
                user_id,
                distance_m = classification.distance_m,
                threshold_m = classification.threshold_m,
                "Check-in outside geofence; off-premises request required"
            );
            return Ok(CheckInOutcome::OffPremisesRequired { classification });
        }

        let ticket = self.admission.admit_check_in(user_id, day).await?;
        let record = self
            .ledger
            .open_session(
                &ticket,
                OpenSession {
                    check_in_time: at,
                    location: report.location,
                    device_class: report.device_class,
                    approval_status: ApprovalStatus::Normal,
                    on_official_duty: false,
                },
            )
            .await?;
        Ok(CheckInOutcome::CheckedIn {
            record,
            classification,
        })
    }

    #[tracing::instrument(skip(self, report), fields(user_id = caller.user_id))]
    pub async fn check_out(
        &self,
        caller: &Caller,
        report: PositionReport,
        at: DateTime<Utc>,
    ) -> AppResult<AttendanceRecord> {
        report.location.validate()?;
        let user_id = caller.user_id;
        let day = self.ledger.work_date(at);

        let record = self
            .ledger
            .record_for_day(user_id, day)
            .await?
            .filter(AttendanceRecord::is_open)
            .ok_or(AppError::NoOpenSession)?;
        if record.approval_status == ApprovalStatus::PendingSupervisorApproval {
            return Err(AppError::NotApproved {
                record_id: record.id,
            });
        }

        let assigned = self.assigned_location(user_id).await?;
        let classification = self
            .resolver
            .classify(
                assigned.as_ref(),
                report.location.coordinate,
                report.device_class,
                Direction::CheckOut,
            )
            .await?;

        if !classification.is_on_site()
            && record.approval_status != ApprovalStatus::ApprovedOffpremises
        {
            tracing::warn!(
                user_id,
                record_id = record.id,
                distance_m = classification.distance_m,
                threshold_m = classification.threshold_m,
                "Check-out refused outside geofence"
            );
            return Err(AppError::validation_with(
                "check-out position is outside the geofence",
                json!({
                    "reason": "outside_geofence",
                    "distance_m": classification.distance_m,
                    "threshold_m": classification.threshold_m,
                    "location_name": classification.location_name,
                }),
            ));
        }

        self.ledger
            .close_session(record.id, at, Some(report.location))
            .await
    }

    #[tracing::instrument(skip(self, report, device_info, reason), fields(user_id = caller.user_id))]
    pub async fn submit_off_premises(
        &self,
        caller: &Caller,
        report: PositionReport,
        device_info: Option<String>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<OffPremisesRequest> {
        report.location.validate()?;

        let assigned = self.assigned_location(caller.user_id).await?;
        let classification = self
            .resolver
            .classify(
                assigned.as_ref(),
                report.location.coordinate,
                report.device_class,
                Direction::CheckIn,
            )
            .await?;
        if classification.is_on_site() {
            return Err(AppError::validation_with(
                "position is within the premises; check in directly",
                json!({
                    "reason": "on_site",
                    "distance_m": classification.distance_m,
                    "threshold_m": classification.threshold_m,
                }),
            ));
        }

        let input = SubmitOffPremises {
            location: report.location,
            device_class: report.device_class,
            device_info: trimmed(device_info),
            reason: trimmed(reason),
        };
        self.workflow.submit(caller, input, at).await
    }

    pub async fn today(&self, caller: &Caller, at: DateTime<Utc>) -> AppResult<TodayView> {
        let day = self.ledger.work_date(at);
        let record = self.ledger.record_for_day(caller.user_id, day).await?;
        let pending_request = self.store.pending_request_for_day(caller.user_id, day).await?;
        Ok(TodayView {
            work_date: day,
            record,
            pending_request,
        })
    }

    async fn assigned_location(&self, user_id: u64) -> AppResult<Option<AssignedLocation>> {
        let profile = self.store.staff_profile(user_id).await?;
        if profile.is_none() {
            tracing::warn!(user_id, "No staff profile; treating position as off-site");
        }
        Ok(profile.and_then(|p| p.assigned_location))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
