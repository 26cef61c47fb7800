pub mod geo;
pub mod keyed_lock;
