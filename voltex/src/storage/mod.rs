//! Persistence: data directory layout, settings file, snapshot store

pub mod layout;
pub mod settings;
pub mod snapshot;
