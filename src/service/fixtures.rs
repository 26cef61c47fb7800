//! Service graph over a seeded in-memory store, shared by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use crate::error::AppResult;
use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, DeviceClass},
    location::{AssignedLocation, Coordinate, ReportedLocation},
    role::Role,
    staff::StaffProfile,
};
use crate::service::{
    admission::CheckInDeduplicator,
    attendance::{AttendanceService, PositionReport},
    audit::AuditTrail,
    ledger::{AttendanceLedger, OpenSession},
    notify::RecordingSink,
    offpremises::OffPremisesWorkflow,
    proximity::DeviceProximityPolicy,
    resolver::LocationResolver,
    Caller,
};
use crate::store::MemoryStore;
use crate::utils::geo;

const DEPT_SALES: u64 = 1;
const DEPT_OPS: u64 = 2;

/// 2026-01-05 at the given UTC time.
pub fn at_hms(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, h, m, s)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time {h}:{m}:{s}"))
}

pub fn near_office(office: &AssignedLocation, meters: f64) -> Coordinate {
    geo::offset_north(office.coordinate, meters)
}

pub fn report_at(office: &AssignedLocation, meters: f64) -> PositionReport {
    PositionReport {
        location: ReportedLocation {
            coordinate: near_office(office, meters),
            place_name: None,
            accuracy_m: Some(8.0),
        },
        device_class: DeviceClass::Mobile,
    }
}

pub fn office() -> AssignedLocation {
    AssignedLocation {
        id: 1,
        name: "Head Office".into(),
        coordinate: Coordinate::new(23.7806, 90.4070),
    }
}

pub fn session(status: ApprovalStatus, at: DateTime<Utc>) -> OpenSession {
    OpenSession {
        check_in_time: at,
        location: ReportedLocation::at(office().coordinate),
        device_class: DeviceClass::Mobile,
        approval_status: status,
        on_official_duty: status == ApprovalStatus::ApprovedOffpremises,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub notes: Arc<RecordingSink>,
    pub policy: Arc<DeviceProximityPolicy>,
    pub resolver: Arc<LocationResolver>,
    pub ledger: Arc<AttendanceLedger>,
    pub admission: Arc<CheckInDeduplicator>,
    pub workflow: Arc<OffPremisesWorkflow>,
    pub attendance: AttendanceService,
    pub office: AssignedLocation,
    pub staff_id: u64,
    pub peer_id: u64,
    pub head_id: u64,
    pub other_head_id: u64,
    pub regional_id: u64,
    pub admin_id: u64,
}

impl Harness {
    pub async fn new() -> Self {
        Self::seeded(0, true).await
    }

    pub async fn without_provisional_records() -> Self {
        Self::seeded(0, false).await
    }

    /// Unseeded graph; enough for pure date arithmetic.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        Self::build(minutes, true)
    }

    async fn seeded(offset_minutes: i32, provisional: bool) -> Self {
        let h = Self::build(offset_minutes, provisional);
        let located = |user_id, role, department_id| StaffProfile {
            user_id,
            role,
            department_id,
            assigned_location: Some(h.office.clone()),
        };
        for profile in [
            located(h.staff_id, Role::Staff, Some(DEPT_SALES)),
            located(h.peer_id, Role::Staff, Some(DEPT_SALES)),
            located(h.head_id, Role::DepartmentHead, Some(DEPT_SALES)),
            located(h.other_head_id, Role::DepartmentHead, Some(DEPT_OPS)),
            located(h.regional_id, Role::RegionalManager, None),
            located(h.admin_id, Role::Admin, None),
        ] {
            h.store.put_staff(profile).await;
        }
        h
    }

    fn build(offset_minutes: i32, provisional: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notes = Arc::new(RecordingSink::new());
        let audit = AuditTrail::new(store.clone());
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .unwrap_or_else(|| panic!("bad offset {offset_minutes}"));
        let policy = Arc::new(DeviceProximityPolicy::new(store.clone(), Duration::from_secs(30)));
        let resolver = Arc::new(LocationResolver::new(policy.clone()));
        let ledger = Arc::new(AttendanceLedger::new(store.clone(), audit.clone(), offset));
        let admission = Arc::new(CheckInDeduplicator::new(
            ledger.clone(),
            Duration::from_millis(500),
        ));
        let workflow = Arc::new(OffPremisesWorkflow::new(
            store.clone(),
            ledger.clone(),
            admission.clone(),
            audit,
            notes.clone(),
            Duration::from_millis(500),
            provisional,
        ));
        let attendance = AttendanceService::new(
            store.clone(),
            ledger.clone(),
            admission.clone(),
            resolver.clone(),
            workflow.clone(),
        );

        Self {
            store,
            notes,
            policy,
            resolver,
            ledger,
            admission,
            workflow,
            attendance,
            office: office(),
            staff_id: 10,
            peer_id: 11,
            head_id: 20,
            other_head_id: 21,
            regional_id: 30,
            admin_id: 1,
        }
    }

    /// Admits and opens a session for `user_id` on the day of `at`.
    pub async fn open(
        &self,
        user_id: u64,
        status: ApprovalStatus,
        at: DateTime<Utc>,
    ) -> AppResult<AttendanceRecord> {
        let ticket = self
            .admission
            .admit_check_in(user_id, self.ledger.work_date(at))
            .await?;
        self.ledger.open_session(&ticket, session(status, at)).await
    }

    pub fn staff(&self) -> Caller {
        Caller::new(self.staff_id, Role::Staff, Some(DEPT_SALES))
    }

    pub fn peer(&self) -> Caller {
        Caller::new(self.peer_id, Role::Staff, Some(DEPT_SALES))
    }

    pub fn head(&self) -> Caller {
        Caller::new(self.head_id, Role::DepartmentHead, Some(DEPT_SALES))
    }

    pub fn other_head(&self) -> Caller {
        Caller::new(self.other_head_id, Role::DepartmentHead, Some(DEPT_OPS))
    }

    pub fn regional(&self) -> Caller {
        Caller::new(self.regional_id, Role::RegionalManager, None)
    }

    pub fn admin(&self) -> Caller {
        Caller::new(self.admin_id, Role::Admin, None)
    }
}
