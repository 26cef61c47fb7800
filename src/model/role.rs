use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin = 1,
    RegionalManager = 2,
    DepartmentHead = 3,
    Staff = 4,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::RegionalManager),
            3 => Some(Role::DepartmentHead),
            4 => Some(Role::Staff),
            _ => None,
        }
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Roles allowed to act on off-premises requests.
    pub fn is_approver(&self) -> bool {
        matches!(
            self,
            Role::Admin | Role::RegionalManager | Role::DepartmentHead
        )
    }

    /// Approvers whose authority is not limited to their own department.
    pub fn has_global_scope(&self) -> bool {
        matches!(self, Role::Admin | Role::RegionalManager)
    }
}
