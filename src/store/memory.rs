use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use super::{AttendanceStore, InsertOutcome, StoreError, StoreResult};
use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, NewAttendanceRecord, SessionClose},
    audit::{AuditEvent, NewAuditEvent},
    device_setting::DeviceProximitySetting,
    offpremises::{NewOffPremisesRequest, OffPremisesRequest, RequestStatus, RequestTransition},
    staff::StaffProfile,
};

#[derive(Default)]
struct State {
    staff: HashMap<u64, StaffProfile>,
    records: BTreeMap<u64, AttendanceRecord>,
    requests: BTreeMap<u64, OffPremisesRequest>,
    settings: Vec<DeviceProximitySetting>,
    audit: Vec<AuditEvent>,
    next_record_id: u64,
    next_request_id: u64,
}

/// Process-local store. Used by the test suites and for running the service
/// without a database. Supports injected faults and a slow insert path to
/// widen race windows.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    failing: StdMutex<HashSet<&'static str>>,
    insert_delay: StdMutex<Duration>,
    settings_writes: AtomicU64,
    insert_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_staff(&self, profile: StaffProfile) {
        self.state.lock().await.staff.insert(profile.user_id, profile);
    }

    /// Makes every operation fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes one named operation (e.g. `"delete_record"`) fail until cleared.
    pub fn fail_operation(&self, op: &'static str, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing {
            set.insert(op);
        } else {
            set.remove(op);
        }
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub async fn records_for(&self, user_id: u64, day: NaiveDate) -> Vec<AttendanceRecord> {
        self.state
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.user_id == user_id && r.work_date == day)
            .cloned()
            .collect()
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().await.audit.clone()
    }

    pub fn settings_write_count(&self) -> u64 {
        self.settings_writes.load(Ordering::SeqCst)
    }

    pub fn insert_call_count(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(op) {
            return Err(StoreError::Unavailable(format!("{op} failing")));
        }
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn staff_profile(&self, user_id: u64) -> StoreResult<Option<StaffProfile>> {
        self.check("staff_profile")?;
        Ok(self.state.lock().await.staff.get(&user_id).cloned())
    }

    async fn approvers_for(&self, department_id: Option<u64>) -> StoreResult<Vec<u64>> {
        self.check("approvers_for")?;
        let state = self.state.lock().await;
        let mut ids: Vec<u64> = state
            .staff
            .values()
            .filter(|p| {
                p.role.has_global_scope()
                    || (p.role.is_approver()
                        && department_id.is_some()
                        && p.department_id == department_id)
            })
            .map(|p| p.user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn record(&self, id: u64) -> StoreResult<Option<AttendanceRecord>> {
        self.check("record")?;
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn record_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        self.check("record_for_day")?;
        Ok(self
            .state
            .lock()
            .await
            .records
            .values()
            .find(|r| r.user_id == user_id && r.work_date == day)
            .cloned())
    }

    async fn insert_record(&self, new: NewAttendanceRecord) -> StoreResult<InsertOutcome> {
        self.check("insert_record")?;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.insert_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .records
            .values()
            .find(|r| r.user_id == new.user_id && r.work_date == new.work_date)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        state.next_record_id += 1;
        let record = AttendanceRecord {
            id: state.next_record_id,
            user_id: new.user_id,
            work_date: new.work_date,
            check_in_time: new.check_in_time,
            check_out_time: None,
            check_in_location: new.check_in_location,
            check_out_location: None,
            work_hours: None,
            approval_status: new.approval_status,
            on_official_duty_outside_premises: new.on_official_duty_outside_premises,
            device_class: new.device_class,
            clock_skew_flagged: false,
        };
        state.records.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn close_record(
        &self,
        id: u64,
        close: SessionClose,
    ) -> StoreResult<Option<AttendanceRecord>> {
        self.check("close_record")?;
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(None);
        };
        if !record.is_open() || record.approval_status == ApprovalStatus::PendingSupervisorApproval
        {
            return Ok(None);
        }
        record.check_out_time = Some(close.check_out_time);
        record.check_out_location = close.check_out_location;
        record.work_hours = Some(close.work_hours);
        record.clock_skew_flagged = close.clock_skew_flagged;
        Ok(Some(record.clone()))
    }

    async fn update_record_status(
        &self,
        id: u64,
        from: ApprovalStatus,
        to: ApprovalStatus,
        on_official_duty: bool,
    ) -> StoreResult<bool> {
        self.check("update_record_status")?;
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(record) if record.approval_status == from => {
                record.approval_status = to;
                record.on_official_duty_outside_premises = on_official_duty;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_record(&self, id: u64, expected: ApprovalStatus) -> StoreResult<bool> {
        self.check("delete_record")?;
        let mut state = self.state.lock().await;
        match state.records.get(&id) {
            Some(record) if record.approval_status == expected => {
                state.records.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_request(&self, new: NewOffPremisesRequest) -> StoreResult<OffPremisesRequest> {
        self.check("insert_request")?;
        let mut state = self.state.lock().await;
        state.next_request_id += 1;
        let request = OffPremisesRequest {
            id: state.next_request_id,
            user_id: new.user_id,
            work_date: new.work_date,
            reported_location: new.reported_location,
            device_info: new.device_info,
            device_class: new.device_class,
            reason: new.reason,
            status: RequestStatus::Pending,
            approved_by_id: None,
            approved_at: None,
            rejection_reason: None,
            linked_attendance_record_id: new.linked_attendance_record_id,
            created_at: new.created_at,
        };
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn request(&self, id: u64) -> StoreResult<Option<OffPremisesRequest>> {
        self.check("request")?;
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn pending_request_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<OffPremisesRequest>> {
        self.check("pending_request_for_day")?;
        Ok(self
            .state
            .lock()
            .await
            .requests
            .values()
            .find(|r| {
                r.user_id == user_id && r.work_date == day && r.status == RequestStatus::Pending
            })
            .cloned())
    }

    async fn pending_requests(
        &self,
        department_id: Option<u64>,
    ) -> StoreResult<Vec<OffPremisesRequest>> {
        self.check("pending_requests")?;
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| match department_id {
                None => true,
                Some(dept) => state
                    .staff
                    .get(&r.user_id)
                    .is_some_and(|p| p.department_id == Some(dept)),
            })
            .cloned()
            .collect())
    }

    async fn transition_request(
        &self,
        id: u64,
        transition: &RequestTransition,
    ) -> StoreResult<Option<OffPremisesRequest>> {
        self.check("transition_request")?;
        let mut state = self.state.lock().await;
        let Some(request) = state.requests.get_mut(&id) else {
            return Ok(None);
        };
        if request.apply(transition) {
            Ok(Some(request.clone()))
        } else {
            Ok(None)
        }
    }

    async fn link_record(&self, request_id: u64, record_id: Option<u64>) -> StoreResult<()> {
        self.check("link_record")?;
        if let Some(request) = self.state.lock().await.requests.get_mut(&request_id) {
            request.linked_attendance_record_id = record_id;
        }
        Ok(())
    }

    async fn device_settings(&self) -> StoreResult<Vec<DeviceProximitySetting>> {
        self.check("device_settings")?;
        Ok(self.state.lock().await.settings.clone())
    }

    async fn replace_device_settings(&self, settings: &[DeviceProximitySetting]) -> StoreResult<()> {
        self.check("replace_device_settings")?;
        self.settings_writes.fetch_add(1, Ordering::SeqCst);
        self.state.lock().await.settings = settings.to_vec();
        Ok(())
    }

    async fn append_audit(&self, event: NewAuditEvent) -> StoreResult<()> {
        self.check("append_audit")?;
        let mut state = self.state.lock().await;
        let id = state.audit.len() as u64 + 1;
        state.audit.push(AuditEvent {
            id,
            actor_id: event.actor_id,
            action: event.action,
            subject_kind: event.subject_kind.to_string(),
            subject_id: event.subject_id,
            detail: event.detail,
            created_at: event.created_at,
        });
        Ok(())
    }
}
