//! Storage seam for the attendance core.
//!
//! Every method is a single atomic step against the backing store. Methods
//! that change state are conditional where the caller's decision depends on
//! current state, so callers re-validate at the moment of mutation instead of
//! trusting an earlier read.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, NewAttendanceRecord, SessionClose},
    audit::NewAuditEvent,
    device_setting::DeviceProximitySetting,
    offpremises::{NewOffPremisesRequest, OffPremisesRequest, RequestTransition},
    staff::StaffProfile,
};

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an insert guarded by the one-record-per-user-per-day rule.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(AttendanceRecord),
    /// A record already existed for that user and day; nothing was written.
    Existing(AttendanceRecord),
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn staff_profile(&self, user_id: u64) -> StoreResult<Option<StaffProfile>>;

    /// User ids allowed to review requests from `department_id`: admins and
    /// regional managers everywhere, department heads of that department.
    async fn approvers_for(&self, department_id: Option<u64>) -> StoreResult<Vec<u64>>;

    async fn record(&self, id: u64) -> StoreResult<Option<AttendanceRecord>>;

    async fn record_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>>;

    async fn insert_record(&self, new: NewAttendanceRecord) -> StoreResult<InsertOutcome>;

    /// Closes the record only if it is still open and not awaiting approval.
    async fn close_record(
        &self,
        id: u64,
        close: SessionClose,
    ) -> StoreResult<Option<AttendanceRecord>>;

    /// Moves a record from `from` to `to` status; false if it was not in `from`.
    async fn update_record_status(
        &self,
        id: u64,
        from: ApprovalStatus,
        to: ApprovalStatus,
        on_official_duty: bool,
    ) -> StoreResult<bool>;

    /// Hard delete, only if the record is still in `expected` status.
    async fn delete_record(&self, id: u64, expected: ApprovalStatus) -> StoreResult<bool>;

    async fn insert_request(&self, new: NewOffPremisesRequest) -> StoreResult<OffPremisesRequest>;

    async fn request(&self, id: u64) -> StoreResult<Option<OffPremisesRequest>>;

    async fn pending_request_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<OffPremisesRequest>>;

    /// Pending requests, optionally restricted to requesters of one department.
    async fn pending_requests(
        &self,
        department_id: Option<u64>,
    ) -> StoreResult<Vec<OffPremisesRequest>>;

    /// Applies the transition if the request is still in
    /// `transition.from_status()`; returns the updated request, or None when
    /// the state had already moved on.
    async fn transition_request(
        &self,
        id: u64,
        transition: &RequestTransition,
    ) -> StoreResult<Option<OffPremisesRequest>>;

    async fn link_record(&self, request_id: u64, record_id: Option<u64>) -> StoreResult<()>;

    async fn device_settings(&self) -> StoreResult<Vec<DeviceProximitySetting>>;

    /// Writes all rows or none.
    async fn replace_device_settings(&self, settings: &[DeviceProximitySetting]) -> StoreResult<()>;

    async fn append_audit(&self, event: NewAuditEvent) -> StoreResult<()>;
}
