pub mod attendance;
pub mod audit;
pub mod device_setting;
pub mod location;
pub mod offpremises;
pub mod role;
pub mod staff;
