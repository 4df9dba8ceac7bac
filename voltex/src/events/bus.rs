//! Event bus fanning pipeline events out to the log, the per-project capture
//! and any registered subscriber

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::events::capture::ProjectEventLog;
use crate::process::OutputSink;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Log { line: String },
    Error { line: String },
    RunStarted,
    StepStarted { index: usize, total: usize, name: String },
    StepFailed { name: String, error: String },
    CloneStarted,
    CloneFinished,
    CloneFailed { error: String },
    RunFinished { success: bool, error: Option<String> },
}

impl EventPayload {
    /// Short event name, used as the capture prefix
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Log { .. } => "consoleLog",
            EventPayload::Error { .. } => "consoleError",
            EventPayload::RunStarted => "queryStarted",
            EventPayload::StepStarted { .. } => "stepStarted",
            EventPayload::StepFailed { .. } => "stepFailed",
            EventPayload::CloneStarted => "gitCloneStarted",
            EventPayload::CloneFinished => "gitCloneFinished",
            EventPayload::CloneFailed { .. } => "gitCloneError",
            EventPayload::RunFinished { .. } => "queryFinished",
        }
    }

    fn detail(&self) -> String {
        match self {
            EventPayload::Log { line } | EventPayload::Error { line } => line.clone(),
            EventPayload::RunStarted | EventPayload::CloneStarted | EventPayload::CloneFinished => {
                String::new()
            }
            EventPayload::StepStarted { index, total, name } => {
                format!("{}/{} {}", index, total, name)
            }
            EventPayload::StepFailed { name, error } => format!("{}: {}", name, error),
            EventPayload::CloneFailed { error } => error.clone(),
            EventPayload::RunFinished { success: true, .. } => "success".to_string(),
            EventPayload::RunFinished { success: false, error } => {
                format!("failure: {}", error.as_deref().unwrap_or("unknown error"))
            }
        }
    }
}

/// A single event emitted during a build run or teardown
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub project_id: String,
    pub run_id: String,
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl PipelineEvent {
    pub fn new(project_id: &str, run_id: &str, payload: EventPayload) -> Self {
        Self {
            project_id: project_id.to_string(),
            run_id: run_id.to_string(),
            at: Utc::now(),
            payload,
        }
    }

    /// Text stored in the per-project capture
    pub fn text(&self) -> String {
        format!("{:>15} | {}", self.payload.name(), self.payload.detail())
    }
}

type Callback = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    project_id: Option<String>,
    callback: Callback,
}

/// Returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Synchronous fan-out of pipeline events.
///
/// Subscribers run on the publishing task and must return promptly; anything
/// slow belongs on a channel owned by the subscriber.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    capture: Arc<ProjectEventLog>,
}

impl EventBus {
    pub fn new(capture: Arc<ProjectEventLog>) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capture,
        }
    }

    /// The per-project capture this bus appends to
    pub fn capture(&self) -> &Arc<ProjectEventLog> {
        &self.capture
    }

    /// Register `callback` for every event, or only for `project_id`'s events
    pub fn subscribe<F>(&self, project_id: Option<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.push(Subscriber {
            id,
            project_id,
            callback: Arc::new(callback),
        });
        SubscriptionHandle(id)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.0);
        subscribers.len() != before
    }

    /// Deliver `event` to the log, the capture and matching subscribers
    pub fn publish(&self, event: PipelineEvent) {
        log_event(&event);
        self.capture.append(&event.project_id, event.text(), event.at.timestamp_millis());

        // Snapshot callbacks so a subscriber may (un)subscribe without deadlocking
        let callbacks: Vec<Callback> = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subscribers
                .iter()
                .filter(|s| {
                    s.project_id
                        .as_deref()
                        .map_or(true, |id| id == event.project_id)
                })
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        for callback in callbacks {
            callback(&event);
        }
    }

    /// An emitter stamping events with `project_id` and `run_id`
    pub fn emitter(self: &Arc<Self>, project_id: &str, run_id: &str) -> EventEmitter {
        EventEmitter {
            bus: Arc::clone(self),
            project_id: project_id.to_string(),
            run_id: run_id.to_string(),
        }
    }
}

fn log_event(event: &PipelineEvent) {
    let project = event.project_id.as_str();
    let run = event.run_id.as_str();
    match &event.payload {
        EventPayload::Error { line } => warn!(project, run, "{}", line),
        EventPayload::StepFailed { name, error } => error!(project, run, step = %name, "{}", error),
        EventPayload::CloneFailed { error } => error!(project, run, "git clone failed: {}", error),
        EventPayload::RunFinished { success: false, error } => error!(
            project,
            run,
            "run failed: {}",
            error.as_deref().unwrap_or("unknown error")
        ),
        EventPayload::RunFinished { success: true, .. } => info!(project, run, "run succeeded"),
        other => info!(project, run, "{} {}", other.name(), other.detail()),
    }
}

/// Publishes events on behalf of one project and run
#[derive(Clone)]
pub struct EventEmitter {
    bus: Arc<EventBus>,
    project_id: String,
    run_id: String,
}

impl EventEmitter {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, payload: EventPayload) {
        self.bus
            .publish(PipelineEvent::new(&self.project_id, &self.run_id, payload));
    }

    pub fn log(&self, line: impl Into<String>) {
        self.emit(EventPayload::Log { line: line.into() });
    }

    pub fn error(&self, line: impl Into<String>) {
        self.emit(EventPayload::Error { line: line.into() });
    }
}

impl OutputSink for EventEmitter {
    fn stdout_line(&self, line: &str) {
        self.log(line);
    }

    fn stderr_line(&self, line: &str) {
        self.error(line);
    }
}
