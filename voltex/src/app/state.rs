//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::allocator::{AddressAllocator, IP_SCOPE};
use crate::deploy::docker::ContainerRuntime;
use crate::deploy::git::SourceControl;
use crate::deploy::pipeline::{BuildPipeline, PipelineDeps};
use crate::deploy::proxy::ProxyConfigurator;
use crate::deploy::teardown::Teardown;
use crate::errors::VoltexError;
use crate::events::bus::EventBus;
use crate::events::capture::ProjectEventLog;
use crate::process::CommandRunner;
use crate::services::projects::ProjectService;
use crate::storage::snapshot::SnapshotStore;
use crate::workers::builder::{build_queue, BuildReceiver};
use crate::workers::deleter::{delete_queue, DeleteReceiver};

/// Queue consumers, handed to the workers once
pub struct QueueReceivers {
    pub builds: BuildReceiver,
    pub deletes: DeleteReceiver,
}

/// Main application state
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub bus: Arc<EventBus>,
    pub allocator: Arc<AddressAllocator>,
    pub pipeline: BuildPipeline,
    pub teardown: Teardown,
    pub projects: Arc<ProjectService>,
}

impl AppState {
    /// Wire every component around `runner` and load the snapshot store
    pub async fn init(
        options: &AppOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<(Self, QueueReceivers), VoltexError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let store = Arc::new(SnapshotStore::new(options.layout.storage_file()));
        store.wait_loaded().await;

        let capture = Arc::new(ProjectEventLog::new());
        let bus = Arc::new(EventBus::new(capture.clone()));

        let allocator = Arc::new(AddressAllocator::new(
            store.scope(IP_SCOPE),
            options.allocator.clone(),
        ));
        let runtime = ContainerRuntime::new(runner.clone(), options.docker.clone());
        let proxy = ProxyConfigurator::new(runner.clone(), options.proxy.clone());
        let source = SourceControl::new(runner, options.git_binary.clone());

        let pipeline = BuildPipeline::new(PipelineDeps {
            layout: options.layout.clone(),
            store: store.clone(),
            allocator: allocator.clone(),
            source,
            runtime: runtime.clone(),
            proxy: proxy.clone(),
            bus: bus.clone(),
        });
        let teardown = Teardown::new(allocator.clone(), proxy, runtime.clone(), bus.clone());

        let (build_tx, build_rx) = build_queue();
        let (delete_tx, delete_rx) = delete_queue();

        let projects = Arc::new(ProjectService::new(
            &store,
            options.layout.clone(),
            build_tx,
            delete_tx,
            runtime,
            capture,
        ));
        projects.init().await?;

        let state = Self {
            store,
            bus,
            allocator,
            pipeline,
            teardown,
            projects,
        };
        let receivers = QueueReceivers {
            builds: build_rx,
            deletes: delete_rx,
        };
        Ok((state, receivers))
    }
}
