pub mod attendance;
pub mod location;
pub mod offpremises;
pub mod settings;
