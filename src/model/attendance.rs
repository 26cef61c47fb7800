use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

use crate::model::location::ReportedLocation;

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Laptop,
    Desktop,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalStatus {
    Normal,
    PendingSupervisorApproval,
    ApprovedOffpremises,
    RejectedOffpremises,
}

impl ApprovalStatus {
    /// Whether a record in this state counts as "present".
    pub fn is_countable(&self) -> bool {
        matches!(self, ApprovalStatus::Normal | ApprovalStatus::ApprovedOffpremises)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "user_id": 42,
    "work_date": "2026-01-01",
    "check_in_time": "2026-01-01T03:00:00Z",
    "check_out_time": null,
    "check_in_location": {
        "coordinate": { "latitude": 23.8103, "longitude": 90.4125 },
        "place_name": "Head Office",
        "accuracy_m": 10.0
    },
    "check_out_location": null,
    "work_hours": null,
    "approval_status": "normal",
    "on_official_duty_outside_premises": false,
    "device_class": "mobile",
    "clock_skew_flagged": false
}))]
pub struct AttendanceRecord {
    pub id: u64,
    pub user_id: u64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub work_date: NaiveDate,
    #[schema(format = "date-time", value_type = String)]
    pub check_in_time: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String, nullable = true)]
    pub check_out_time: Option<DateTime<Utc>>,
    pub check_in_location: ReportedLocation,
    #[schema(nullable = true)]
    pub check_out_location: Option<ReportedLocation>,
    #[schema(example = 8.25, nullable = true)]
    pub work_hours: Option<f64>,
    pub approval_status: ApprovalStatus,
    pub on_official_duty_outside_premises: bool,
    pub device_class: DeviceClass,
    /// Set when check-out preceded check-in and work hours were clamped to 0.
    pub clock_skew_flagged: bool,
}

impl AttendanceRecord {
    pub fn is_open(&self) -> bool {
        self.check_out_time.is_none()
    }
}

/// Insert payload for a new attendance session.
#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub user_id: u64,
    pub work_date: NaiveDate,
    pub check_in_time: DateTime<Utc>,
    pub check_in_location: ReportedLocation,
    pub device_class: DeviceClass,
    pub approval_status: ApprovalStatus,
    pub on_official_duty_outside_premises: bool,
}

/// Fields written when a session is closed.
#[derive(Debug, Clone)]
pub struct SessionClose {
    pub check_out_time: DateTime<Utc>,
    pub check_out_location: Option<ReportedLocation>,
    pub work_hours: f64,
    pub clock_skew_flagged: bool,
}
