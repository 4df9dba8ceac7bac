//! Project lifecycle: records in the snapshot store plus queued builds and
//! teardowns

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::deploy::docker::{ContainerRuntime, LogWindow};
use crate::deploy::pipeline::BuildRun;
use crate::deploy::teardown::TeardownReport;
use crate::errors::VoltexError;
use crate::events::capture::{CapturedEvent, ProjectEventLog};
use crate::models::project::{
    validate_force_ip, BuildQuery, DeployRecord, Project, ProjectRequest, DEPLOY_SCOPE, PROJECTS_SCOPE,
    PROJECT_INDEX_KEY,
};
use crate::storage::layout::StorageLayout;
use crate::storage::snapshot::{Scope, SnapshotStore};
use crate::utils::generate_id;
use crate::workers::builder::BuildQueue;
use crate::workers::deleter::DeleteQueue;
use crate::workers::queue::Completion;

/// A build accepted onto the build queue
pub struct QueuedBuild {
    pub project_id: String,
    pub build_id: String,
    pub completion: Completion<BuildRun>,
}

/// Project operations
pub struct ProjectService {
    projects: Scope,
    deploys: Scope,
    layout: StorageLayout,
    builds: BuildQueue,
    deletes: DeleteQueue,
    runtime: ContainerRuntime,
    events: Arc<ProjectEventLog>,

    // Serializes read-modify-write of the id index
    index_lock: Mutex<()>,
}

impl ProjectService {
    pub fn new(
        store: &Arc<SnapshotStore>,
        layout: StorageLayout,
        builds: BuildQueue,
        deletes: DeleteQueue,
        runtime: ContainerRuntime,
        events: Arc<ProjectEventLog>,
    ) -> Self {
        Self {
            projects: store.scope(PROJECTS_SCOPE),
            deploys: store.scope(DEPLOY_SCOPE),
            layout,
            builds,
            deletes,
            runtime,
            events,
            index_lock: Mutex::new(()),
        }
    }

    /// Create the id index if the store has none yet
    pub async fn init(&self) -> Result<(), VoltexError> {
        let _guard = self.index_lock.lock().await;
        if !self.projects.has(PROJECT_INDEX_KEY).await {
            self.projects.set(PROJECT_INDEX_KEY, &Vec::<String>::new()).await?;
        }
        Ok(())
    }

    /// Ids of every project
    pub async fn list(&self) -> Result<Vec<String>, VoltexError> {
        Ok(self.projects.get(PROJECT_INDEX_KEY).await?.unwrap_or_default())
    }

    pub async fn get(&self, id: &str) -> Result<Project, VoltexError> {
        if id == PROJECT_INDEX_KEY {
            return Err(not_found(id));
        }
        self.projects.get(id).await?.ok_or_else(|| not_found(id))
    }

    /// Source commit and run of the live deployment, if any build succeeded
    pub async fn deployment(&self, id: &str) -> Result<Option<DeployRecord>, VoltexError> {
        self.get(id).await?;
        self.deploys.get(id).await
    }

    /// Validate and store a new project, then queue its first build
    pub async fn create(&self, request: ProjectRequest) -> Result<QueuedBuild, VoltexError> {
        let validated = request.validate()?;
        let project = Project {
            id: generate_id(),
            name: validated.name,
            description: validated.description,
            recipe: validated.recipe,
            container_id: None,
            container_ip: None,
            container_image_id: None,
        };

        self.projects.set(&project.id, &project).await?;
        self.add_to_index(&project.id).await?;
        info!("Created project {} ({})", project.id, project.name);

        self.enqueue_build(project.build_query(validated.force_ip))
    }

    /// Queue a build replacing the current deployment of `id`
    pub async fn rebuild(&self, id: &str, force_ip: Option<String>) -> Result<QueuedBuild, VoltexError> {
        let force_ip = validate_force_ip(force_ip)?;
        let project = self.get(id).await?;
        self.add_to_index(id).await?;
        self.enqueue_build(project.build_query(force_ip))
    }

    /// Replace the recipe of `id`, keeping its live container identity. The
    /// new recipe takes effect on the next build.
    pub async fn update(&self, id: &str, request: ProjectRequest) -> Result<Project, VoltexError> {
        let current = self.get(id).await?;
        let validated = request.validate()?;
        let project = Project {
            name: validated.name,
            description: validated.description,
            recipe: validated.recipe,
            ..current
        };

        self.projects.set(id, &project).await?;
        self.add_to_index(id).await?;
        info!("Updated project {}", id);
        Ok(project)
    }

    /// Forget `id` and queue the teardown of its resources
    pub async fn delete(&self, id: &str) -> Result<Completion<TeardownReport>, VoltexError> {
        let project = self.get(id).await?;
        {
            let _guard = self.index_lock.lock().await;
            let mut ids = self.list().await?;
            if !ids.iter().any(|known| known == id) {
                return Err(not_found(id));
            }
            ids.retain(|known| known != id);
            self.projects.set(PROJECT_INDEX_KEY, &ids).await?;
        }
        self.projects.delete(id).await?;
        self.deploys.delete(id).await?;
        info!("Deleted project {}", id);

        self.deletes.enqueue(project.delete_task())
    }

    /// Runtime status of the live container, e.g. `running`
    pub async fn status(&self, id: &str) -> Result<String, VoltexError> {
        let container = self.live_container(id).await?;
        self.runtime.status(&container).await
    }

    /// Start the live container if it is stopped
    pub async fn start(&self, id: &str) -> Result<(), VoltexError> {
        let container = self.live_container(id).await?;
        self.runtime.start(&container).await?;
        info!("Started container {} of {}", container, id);
        Ok(())
    }

    /// Recent timestamped log lines of the live container
    pub async fn container_logs(&self, id: &str, window: &LogWindow) -> Result<String, VoltexError> {
        let container = self.live_container(id).await?;
        self.runtime.logs(&container, window).await
    }

    /// Captured deployment events of `id` within `[since, until]`
    pub async fn deployment_events(
        &self,
        id: &str,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<CapturedEvent>, VoltexError> {
        self.get(id).await?;
        Ok(self.events.range(id, since, until))
    }

    fn enqueue_build(&self, query: BuildQuery) -> Result<QueuedBuild, VoltexError> {
        let run = BuildRun::new(query, &self.layout);
        let project_id = run.project_id().to_string();
        let build_id = run.id().to_string();
        let completion = self.builds.enqueue(run)?;
        info!(
            "Queued build {} of {} ({} ahead)",
            build_id,
            project_id,
            self.builds.pending().saturating_sub(1)
        );
        Ok(QueuedBuild {
            project_id,
            build_id,
            completion,
        })
    }

    async fn add_to_index(&self, id: &str) -> Result<(), VoltexError> {
        let _guard = self.index_lock.lock().await;
        let mut ids = self.list().await?;
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
            self.projects.set(PROJECT_INDEX_KEY, &ids).await?;
        }
        Ok(())
    }

    async fn live_container(&self, id: &str) -> Result<String, VoltexError> {
        self.get(id)
            .await?
            .container_id
            .ok_or_else(|| VoltexError::NotDeployed(format!("Project {} has no container yet", id)))
    }
}

fn not_found(id: &str) -> VoltexError {
    VoltexError::NotFound(format!("Project {} not found", id))
}
