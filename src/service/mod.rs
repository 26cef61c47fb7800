pub mod admission;
pub mod attendance;
pub mod audit;
pub mod batcher;
pub mod ledger;
pub mod notify;
pub mod offpremises;
pub mod presence;
pub mod proximity;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::model::role::Role;

/// The authenticated user a service call is made on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub user_id: u64,
    pub role: Role,
    pub department_id: Option<u64>,
}

impl Caller {
    pub fn new(user_id: u64, role: Role, department_id: Option<u64>) -> Self {
        Self {
            user_id,
            role,
            department_id,
        }
    }
}
