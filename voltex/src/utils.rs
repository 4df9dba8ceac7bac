//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for voltex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a short identifier (8 lowercase hex characters).
///
/// Used for project ids and build run ids. Run ids double as image tags, so
/// the result must stay a valid docker reference.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
