//! Operations behind the HTTP API

pub mod projects;
