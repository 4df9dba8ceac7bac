//! Deployment module

pub mod allocator;
pub mod docker;
pub mod fsm;
pub mod git;
pub mod pipeline;
pub mod proxy;
pub mod step;
pub mod teardown;
