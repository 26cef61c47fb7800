use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum AuditAction {
    #[strum(serialize = "offpremises.approved")]
    OffPremisesApproved,
    #[strum(serialize = "offpremises.rejected")]
    OffPremisesRejected,
    #[strum(serialize = "offpremises.reverted")]
    OffPremisesReverted,
    #[strum(serialize = "attendance.clock_skew")]
    ClockSkewClamped,
    #[strum(serialize = "settings.device_radius_updated")]
    DeviceRadiusUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: u64,
    pub actor_id: Option<u64>,
    pub action: AuditAction,
    pub subject_kind: String,
    pub subject_id: Option<u64>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub actor_id: Option<u64>,
    pub action: AuditAction,
    pub subject_kind: &'static str,
    pub subject_id: Option<u64>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
