use serde::{Deserialize, Serialize};

use crate::model::{location::AssignedLocation, role::Role};

/// What the store knows about a member of staff. Maintained elsewhere; this
/// service only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffProfile {
    pub user_id: u64,
    pub role: Role,
    pub department_id: Option<u64>,
    pub assigned_location: Option<AssignedLocation>,
}
