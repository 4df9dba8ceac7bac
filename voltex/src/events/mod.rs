//! Pipeline events: the bus and the per-project capture

pub mod bus;
pub mod capture;
