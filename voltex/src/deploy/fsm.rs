//! Finite state machine of a single build run

use serde::{Deserialize, Serialize};

/// Build run state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Constructed, not yet picked up by the build queue
    Pending,

    /// Steps are executing
    Running,

    /// Every step completed and cleanup ran
    Succeeded,

    /// A fatal step failed and cleanup ran
    Failed,
}

impl RunState {
    /// Terminal states end the run's observable lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

/// Build run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The executor starts the first step
    Start,

    /// All steps completed
    Succeed,

    /// A fatal step failed
    Fail(String),
}

/// Build run FSM
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: RunState,
    error: Option<String>,
}

impl RunFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: RunState::Pending,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Failure message, set only in [`RunState::Failed`]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (RunState::Pending, RunEvent::Start) => RunState::Running,
            (RunState::Running, RunEvent::Succeed) => RunState::Succeeded,
            (RunState::Running, RunEvent::Fail(err)) => {
                self.error = Some(err.clone());
                RunState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}
