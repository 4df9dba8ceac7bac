//! Server state

use std::sync::Arc;

use crate::services::projects::ProjectService;

/// Server state shared across handlers
pub struct ServerState {
    pub projects: Arc<ProjectService>,
}

impl ServerState {
    pub fn new(projects: Arc<ProjectService>) -> Self {
        Self { projects }
    }
}
