//! Shared fixtures: a scripted command runner and a fully wired app state
//! rooted in a temporary directory

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use voltex::app::options::AppOptions;
use voltex::app::state::{AppState, QueueReceivers};
use voltex::errors::VoltexError;
use voltex::events::bus::{EventPayload, PipelineEvent};
use voltex::models::project::{BuildQuery, BuildRecipe, Project, PROJECTS_SCOPE};
use voltex::process::{CommandOutput, CommandRunner, CommandSpec, OutputSink};
use voltex::storage::layout::StorageLayout;

/// Hash printed by the scripted `git rev-parse HEAD`
pub const COMMIT: &str = "3f2c9e1d7a6b5c4d3e2f1a0b9c8d7e6f5a4b3c2d";

/// Records every command and succeeds unless told otherwise
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<Vec<String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command sleeps for `delay` before finishing
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Commands whose rendered text contains `pattern` exit with code 1
    pub fn fail_on(&self, pattern: &str) {
        self.failures.lock().unwrap().push(pattern.to_string());
    }

    /// Rendered text of every command run so far
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.to_string()).collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    /// Highest number of commands that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, sink: &dyn OutputSink) -> Result<CommandOutput, VoltexError> {
        self.calls.lock().unwrap().push(spec.clone());
        let text = spec.to_string();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self.failures.lock().unwrap().iter().any(|f| text.contains(f.as_str()));
        if failing {
            sink.stderr_line("scripted failure");
            return Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "scripted failure\n".to_string(),
            });
        }

        let stdout = match spec.args.first().map(String::as_str) {
            Some("rev-parse") => format!("{}\n", COMMIT),
            Some("inspect") => "running\n".to_string(),
            Some("logs") => "2024-05-01T10:00:00.000000000Z listening on 3000\n".to_string(),
            _ => format!("ok: {}\n", spec.short_name()),
        };
        for line in stdout.lines() {
            sink.stdout_line(line);
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// App state wired around a [`ScriptedRunner`] inside a temp directory
pub struct Harness {
    pub dir: TempDir,
    pub runner: Arc<ScriptedRunner>,
    pub options: AppOptions,
    pub state: AppState,
    pub receivers: Option<QueueReceivers>,
    pub events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl Harness {
    pub async fn new(runner: ScriptedRunner) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut options = AppOptions::default();
        options.layout = StorageLayout::new(dir.path().join("data"));
        options.proxy.config_dir = dir.path().join("sites");

        let runner = Arc::new(runner);
        let shared: Arc<dyn CommandRunner> = runner.clone();
        let (state, receivers) = AppState::init(&options, shared).await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        state.bus.subscribe(None, move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        Self {
            dir,
            runner,
            options,
            state,
            receivers: Some(receivers),
            events,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.options.layout
    }

    /// Payloads published so far
    pub fn payloads(&self) -> Vec<EventPayload> {
        self.events.lock().unwrap().iter().map(|e| e.payload.clone()).collect()
    }

    /// `RunFinished` payloads published so far
    pub fn finished(&self) -> Vec<(bool, Option<String>)> {
        self.payloads()
            .into_iter()
            .filter_map(|p| match p {
                EventPayload::RunFinished { success, error } => Some((success, error)),
                _ => None,
            })
            .collect()
    }

    /// Store a project record and return it
    pub async fn insert_project(&self, project: Project) -> Project {
        self.state
            .store
            .scope(PROJECTS_SCOPE)
            .set(&project.id, &project)
            .await
            .unwrap();
        project
    }

    pub async fn project(&self, id: &str) -> Option<Project> {
        self.state.store.scope(PROJECTS_SCOPE).get(id).await.unwrap()
    }

    pub fn proxy_file(&self, project_id: &str) -> std::path::PathBuf {
        self.options.proxy.config_dir.join(format!("{}.conf", project_id))
    }
}

pub fn recipe() -> BuildRecipe {
    BuildRecipe {
        git_url: "https://git.example.com/team/site.git".to_string(),
        docker_from: "node:20-alpine".to_string(),
        docker_script: "RUN npm ci\nRUN npm run build".to_string(),
        start_command: "[\"node\", \"server.js\"]".to_string(),
        expose_port: 3000,
        alloc_domain: "site.example.com".to_string(),
        require_passkey_auth: false,
    }
}

/// A project that has never been built
pub fn fresh_project(id: &str) -> Project {
    Project {
        id: id.to_string(),
        name: format!("project {}", id),
        description: None,
        recipe: recipe(),
        container_id: None,
        container_ip: None,
        container_image_id: None,
    }
}

/// A project with a live container from an earlier build
pub fn deployed_project(id: &str) -> Project {
    Project {
        container_id: Some(format!("{}_0badc0de", id)),
        container_ip: Some("172.20.9.9".to_string()),
        container_image_id: Some("0badc0de".to_string()),
        ..fresh_project(id)
    }
}

pub fn first_build(id: &str, force_ip: Option<&str>) -> BuildQuery {
    fresh_project(id).build_query(force_ip.map(str::to_string))
}
