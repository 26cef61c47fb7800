use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::{attendance::DeviceClass, location::ReportedLocation};

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Approver actions on a request, named as they appear in error messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestAction {
    Approve,
    Reject,
    Revert,
}

impl RequestAction {
    /// The only status this action may be applied from.
    pub fn required_status(&self) -> RequestStatus {
        match self {
            RequestAction::Approve | RequestAction::Reject => RequestStatus::Pending,
            RequestAction::Revert => RequestStatus::Approved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OffPremisesRequest {
    #[schema(example = 7)]
    pub id: u64,
    #[schema(example = 42)]
    pub user_id: u64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub work_date: NaiveDate,
    pub reported_location: ReportedLocation,
    #[schema(example = "Pixel 8 / Android 15", nullable = true)]
    pub device_info: Option<String>,
    pub device_class: DeviceClass,
    #[schema(example = "Client site visit", nullable = true)]
    pub reason: Option<String>,
    pub status: RequestStatus,
    #[schema(nullable = true)]
    pub approved_by_id: Option<u64>,
    #[schema(format = "date-time", value_type = String, nullable = true)]
    pub approved_at: Option<DateTime<Utc>>,
    #[schema(nullable = true)]
    pub rejection_reason: Option<String>,
    #[schema(nullable = true)]
    pub linked_attendance_record_id: Option<u64>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOffPremisesRequest {
    pub user_id: u64,
    pub work_date: NaiveDate,
    pub reported_location: ReportedLocation,
    pub device_info: Option<String>,
    pub device_class: DeviceClass,
    pub reason: Option<String>,
    pub linked_attendance_record_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// A status change applied conditionally: the store only writes it when the
/// request is still in `from_status()`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestTransition {
    Approve {
        approver_id: u64,
        at: DateTime<Utc>,
    },
    Reject {
        reason: String,
    },
    /// Approved back to pending; clears approval fields and the record link.
    Revert,
    /// Undo of an approve/reject whose ledger side effect failed.
    Reopen { from: RequestStatus },
}

impl RequestTransition {
    pub fn from_status(&self) -> RequestStatus {
        match self {
            RequestTransition::Approve { .. } | RequestTransition::Reject { .. } => {
                RequestStatus::Pending
            }
            RequestTransition::Revert => RequestStatus::Approved,
            RequestTransition::Reopen { from } => *from,
        }
    }

    pub fn to_status(&self) -> RequestStatus {
        match self {
            RequestTransition::Approve { .. } => RequestStatus::Approved,
            RequestTransition::Reject { .. } => RequestStatus::Rejected,
            RequestTransition::Revert | RequestTransition::Reopen { .. } => RequestStatus::Pending,
        }
    }
}

impl OffPremisesRequest {
    /// Applies `transition` in place if the request is in the expected state.
    /// Returns false and leaves the request untouched otherwise.
    pub fn apply(&mut self, transition: &RequestTransition) -> bool {
        if self.status != transition.from_status() {
            return false;
        }
        match transition {
            RequestTransition::Approve { approver_id, at } => {
                self.approved_by_id = Some(*approver_id);
                self.approved_at = Some(*at);
                self.rejection_reason = None;
            }
            RequestTransition::Reject { reason } => {
                self.approved_by_id = None;
                self.approved_at = None;
                self.rejection_reason = Some(reason.clone());
            }
            RequestTransition::Revert => {
                self.approved_by_id = None;
                self.approved_at = None;
                self.rejection_reason = None;
                self.linked_attendance_record_id = None;
            }
            RequestTransition::Reopen { .. } => {
                self.approved_by_id = None;
                self.approved_at = None;
                self.rejection_reason = None;
            }
        }
        self.status = transition.to_status();
        true
    }
}
