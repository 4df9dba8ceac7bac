//! voltex library
//!
//! Core modules of the voltex deployment control plane.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod process;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workers;
