//! Background workers

pub mod builder;
pub mod deleter;
pub mod queue;
