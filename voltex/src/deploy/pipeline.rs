//! Build pipeline executor
//!
//! A [`BuildRun`] walks [`Step::ALL`] in order. Fatal failures stop the walk,
//! run cleanup and end the run in [`RunState::Failed`]; soft failures are
//! reported and skipped. Exactly one `RunFinished` event is published per run.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::deploy::allocator::AddressAllocator;
use crate::deploy::docker::{ContainerLaunch, ContainerRuntime};
use crate::deploy::fsm::{RunEvent, RunFsm, RunState};
use crate::deploy::git::SourceControl;
use crate::deploy::proxy::{ProxyConfigurator, ProxySite};
use crate::deploy::step::{Severity, Step};
use crate::errors::VoltexError;
use crate::events::bus::{EventBus, EventEmitter, EventPayload};
use crate::filesys::dir::Dir;
use crate::models::project::{BuildQuery, BuildRecipe, DeployRecord, Project, DEPLOY_SCOPE, PROJECTS_SCOPE};
use crate::storage::layout::StorageLayout;
use crate::storage::snapshot::SnapshotStore;
use crate::utils::generate_id;

/// Name of the generated build descriptor inside the cloned repository
pub const DOCKERFILE: &str = "Dockerfile";

/// Build descriptor for `recipe`
pub fn render_dockerfile(recipe: &BuildRecipe) -> String {
    format!(
        "FROM {}\nWORKDIR /app\nCOPY . .\n\n{}\n\nCMD {}\n",
        recipe.docker_from, recipe.docker_script, recipe.start_command
    )
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { step: Step, message: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }

    /// `<step>: <message>` for a failure
    pub fn error_text(&self) -> Option<String> {
        match self {
            RunOutcome::Succeeded => None,
            RunOutcome::Failed { step, message } => Some(format!("{}: {}", step, message)),
        }
    }
}

/// One execution of the pipeline for a [`BuildQuery`]
#[derive(Debug)]
pub struct BuildRun {
    id: String,
    query: BuildQuery,
    workspace: Dir,
    fsm: RunFsm,
    commit: Option<String>,
    address: Option<String>,
    outcome: Option<RunOutcome>,

    // What this run created and must undo on failure
    address_reserved: bool,
    image_built: bool,
    container_launched: bool,
    proxy_published: bool,
}

impl BuildRun {
    pub fn new(query: BuildQuery, layout: &StorageLayout) -> Self {
        let id = generate_id();
        let workspace = layout.run_workspace(&query.project_id, &id);
        Self {
            id,
            query,
            workspace,
            fsm: RunFsm::new(),
            commit: None,
            address: None,
            outcome: None,
            address_reserved: false,
            image_built: false,
            container_launched: false,
            proxy_published: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &BuildQuery {
        &self.query
    }

    pub fn project_id(&self) -> &str {
        &self.query.project_id
    }

    pub fn workspace(&self) -> &Dir {
        &self.workspace
    }

    pub fn state(&self) -> &RunState {
        self.fsm.state()
    }

    /// Source commit, known once the clone step succeeded
    pub fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    /// Address of the new container, known once allocation succeeded
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Name of the container this run launches
    pub fn container_name(&self) -> String {
        format!("{}_{}", self.query.project_id, self.id)
    }

    /// Tag of the image this run builds
    pub fn image_tag(&self) -> &str {
        &self.id
    }

    fn repository_dir(&self) -> Dir {
        self.workspace.subdir("repository")
    }
}

/// Collaborators of the pipeline
#[derive(Clone)]
pub struct PipelineDeps {
    pub layout: StorageLayout,
    pub store: Arc<SnapshotStore>,
    pub allocator: Arc<AddressAllocator>,
    pub source: SourceControl,
    pub runtime: ContainerRuntime,
    pub proxy: ProxyConfigurator,
    pub bus: Arc<EventBus>,
}

/// Drives [`BuildRun`]s through every step
#[derive(Clone)]
pub struct BuildPipeline {
    deps: PipelineDeps,
}

impl BuildPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.deps.layout
    }

    /// Execute `run` to a terminal state. Never returns an error: failures
    /// are reported through the outcome and the event bus.
    pub async fn execute(&self, run: &mut BuildRun) -> RunOutcome {
        let events = self.deps.bus.emitter(run.project_id(), run.id());

        if let Err(e) = run.fsm.process(RunEvent::Start) {
            error!("Run {} not started: {}", run.id, e);
            return RunOutcome::Failed {
                step: Step::PrepareWorkspace,
                message: e,
            };
        }
        info!("Build run {} started for project {}", run.id, run.project_id());
        events.emit(EventPayload::RunStarted);

        let total = Step::ALL.len();
        let mut failure = None;
        for step in Step::ALL {
            events.emit(EventPayload::StepStarted {
                index: step.number(),
                total,
                name: step.name().to_string(),
            });

            let Err(e) = self.run_step(step, run, &events).await else {
                continue;
            };
            events.emit(EventPayload::StepFailed {
                name: step.name().to_string(),
                error: e.to_string(),
            });

            match step.severity() {
                Severity::Soft => {
                    warn!("Run {}: {} failed, continuing: {}", run.id, step, e);
                }
                Severity::Fatal => {
                    error!("Run {}: {} failed: {}", run.id, step, e);
                    failure = Some(RunOutcome::Failed {
                        step,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        self.cleanup(run, &events, failure.is_some()).await;

        let outcome = failure.unwrap_or(RunOutcome::Succeeded);
        let transition = match outcome.error_text() {
            None => run.fsm.process(RunEvent::Succeed),
            Some(text) => run.fsm.process(RunEvent::Fail(text)),
        };
        if let Err(e) = transition {
            error!("Run {}: {}", run.id, e);
        }

        events.emit(EventPayload::RunFinished {
            success: outcome.is_success(),
            error: outcome.error_text(),
        });
        info!("Build run {} finished: {:?}", run.id, run.state());

        run.outcome = Some(outcome.clone());
        outcome
    }

    async fn run_step(&self, step: Step, run: &mut BuildRun, events: &EventEmitter) -> Result<(), VoltexError> {
        match step {
            Step::PrepareWorkspace => {
                run.workspace.delete().await?;
                run.workspace.create().await
            }

            Step::CloneSource => {
                events.emit(EventPayload::CloneStarted);
                let repository = run.repository_dir();
                let cloned = async {
                    self.deps
                        .source
                        .clone_repository(&run.query.recipe.git_url, repository.path(), events)
                        .await?;
                    self.deps.source.head_commit(repository.path()).await
                }
                .await;

                match cloned {
                    Ok(hash) => {
                        events.log(format!("HEAD is {}", hash));
                        run.commit = Some(hash);
                        events.emit(EventPayload::CloneFinished);
                        Ok(())
                    }
                    Err(e) => {
                        events.emit(EventPayload::CloneFailed { error: e.to_string() });
                        Err(e)
                    }
                }
            }

            Step::WriteDockerfile => {
                let contents = render_dockerfile(&run.query.recipe);
                let dockerfile = run.repository_dir().file(DOCKERFILE);
                dockerfile.write_string(&contents).await?;
                debug!("Wrote {}", dockerfile.path().display());
                Ok(())
            }

            Step::BuildImage => {
                let tag = run.image_tag().to_string();
                self.deps
                    .runtime
                    .build_image(&tag, run.repository_dir().path(), events)
                    .await?;
                run.image_built = true;
                Ok(())
            }

            Step::AllocateAddress => {
                let address = self.deps.allocator.allocate(run.query.force_ip.as_deref()).await?;
                events.log(format!("Allocated address {}", address));
                run.address_reserved = run.query.force_ip.is_none();
                run.address = Some(address);
                Ok(())
            }

            Step::CreateDataDir => self.deps.layout.project_data_dir(run.project_id()).create().await,

            Step::ReleasePreviousAddress => {
                let Some(previous) = run.query.old_container_ip.as_deref() else {
                    return Ok(());
                };
                // A pinned address may equal the old one; it now belongs to this run
                if run.address.as_deref() == Some(previous) {
                    debug!("Previous address {} reused, keeping reservation", previous);
                    return Ok(());
                }
                self.deps.allocator.release(previous).await
            }

            Step::RemovePreviousContainer => match run.query.old_container_id.as_deref() {
                Some(previous) => self.deps.runtime.remove_container(previous, events).await,
                None => Ok(()),
            },

            Step::RemovePreviousImage => match run.query.old_container_image_id.as_deref() {
                Some(previous) => self.deps.runtime.remove_image(previous, events).await,
                None => Ok(()),
            },

            Step::RunContainer => {
                let address = run
                    .address
                    .clone()
                    .ok_or_else(|| VoltexError::Internal("no address allocated".to_string()))?;
                let name = run.container_name();
                let data_dir = self.deps.layout.project_data_dir(run.project_id());

                // Set before launching so a half-started container is removed too
                run.container_launched = true;
                self.deps
                    .runtime
                    .run_container(
                        &ContainerLaunch {
                            name: &name,
                            image: run.image_tag(),
                            address: &address,
                            port: run.query.recipe.expose_port,
                            data_dir: data_dir.path(),
                        },
                        events,
                    )
                    .await
            }

            Step::ConfigureProxy => {
                let address = run
                    .address
                    .clone()
                    .ok_or_else(|| VoltexError::Internal("no address allocated".to_string()))?;
                let site = ProxySite {
                    domain: run.query.recipe.alloc_domain.clone(),
                    address,
                    port: run.query.recipe.expose_port,
                    auth_required: run.query.recipe.require_passkey_auth,
                };
                self.deps.proxy.publish(run.project_id(), &site, events).await?;
                run.proxy_published = true;
                Ok(())
            }

            Step::PersistProject => self.persist(run).await,
        }
    }

    async fn persist(&self, run: &BuildRun) -> Result<(), VoltexError> {
        let projects = self.deps.store.scope(PROJECTS_SCOPE);
        let mut project: Project = projects.get(run.project_id()).await?.ok_or_else(|| {
            VoltexError::DeployError(format!("Project {} no longer exists", run.project_id()))
        })?;

        project.container_id = Some(run.container_name());
        project.container_ip = run.address.clone();
        project.container_image_id = Some(run.image_tag().to_string());
        projects.set(run.project_id(), &project).await?;

        let record = DeployRecord {
            git_hash: run.commit.clone(),
            build_id: run.id.clone(),
        };
        self.deps.store.scope(DEPLOY_SCOPE).set(run.project_id(), &record).await?;
        info!(
            "Project {} now runs {} at {}",
            run.project_id(),
            run.container_name(),
            run.address.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    /// Remove the workspace; after a failure also undo what the run created
    async fn cleanup(&self, run: &BuildRun, events: &EventEmitter, failed: bool) {
        if let Err(e) = run.workspace.delete().await {
            error!("Failed to remove workspace {}: {}", run.workspace.path().display(), e);
            events.error(format!("Failed to remove workspace: {}", e));
        }

        if !failed {
            return;
        }

        // The config would point at the container removed below
        if run.proxy_published {
            match self.deps.proxy.remove(run.project_id()).await {
                Ok(true) => self.deps.proxy.reload(events).await,
                Ok(false) => {}
                Err(e) => warn!("Cleanup of proxy config for {} failed: {}", run.project_id(), e),
            }
        }
        if run.container_launched {
            if let Err(e) = self.deps.runtime.remove_container(&run.container_name(), events).await {
                warn!("Cleanup of container {} failed: {}", run.container_name(), e);
            }
        }
        if run.image_built {
            if let Err(e) = self.deps.runtime.remove_image(run.image_tag(), events).await {
                warn!("Cleanup of image {} failed: {}", run.image_tag(), e);
            }
        }
        if run.address_reserved {
            if let Some(address) = run.address.as_deref() {
                if let Err(e) = self.deps.allocator.release(address).await {
                    warn!("Cleanup of address {} failed: {}", address, e);
                }
            }
        }
    }
}
