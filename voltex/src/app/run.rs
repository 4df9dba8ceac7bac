//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, QueueReceivers};
use crate::errors::VoltexError;
use crate::process::{CommandRunner, ProcessRunner};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{builder, deleter};

/// Run the control plane until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), VoltexError> {
    info!("Initializing voltex...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    if let Err(e) = init(&options, runner, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start voltex: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    runner: Arc<dyn CommandRunner>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, VoltexError> {
    let (app_state, receivers) = AppState::init(options, runner).await?;
    let app_state = Arc::new(app_state);
    let QueueReceivers { builds, deletes } = receivers;

    init_build_worker(builds, app_state.clone(), shutdown_manager, shutdown_tx.subscribe())?;
    init_delete_worker(deletes, app_state.clone(), shutdown_manager, shutdown_tx.subscribe())?;
    init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;

    Ok(app_state)
}

fn init_build_worker(
    receiver: builder::BuildReceiver,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), VoltexError> {
    info!("Initializing build worker...");

    let pipeline = app_state.pipeline.clone();
    let handle = tokio::spawn(async move {
        builder::run(
            receiver,
            pipeline,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_build_worker_handle(handle)
}

fn init_delete_worker(
    receiver: deleter::DeleteReceiver,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), VoltexError> {
    info!("Initializing delete worker...");

    let teardown = app_state.teardown.clone();
    let handle = tokio::spawn(async move {
        deleter::run(
            receiver,
            teardown,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_delete_worker_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), VoltexError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.projects.clone());
    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), VoltexError>>>,
    build_worker_handle: Option<JoinHandle<()>>,
    delete_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            build_worker_handle: None,
            delete_worker_handle: None,
        }
    }

    pub fn with_build_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), VoltexError> {
        if self.build_worker_handle.is_some() {
            return Err(VoltexError::ShutdownError("build_worker_handle already set".to_string()));
        }
        self.build_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_delete_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), VoltexError> {
        if self.delete_worker_handle.is_some() {
            return Err(VoltexError::ShutdownError("delete_worker_handle already set".to_string()));
        }
        self.delete_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), VoltexError>>,
    ) -> Result<(), VoltexError> {
        if self.server_handle.is_some() {
            return Err(VoltexError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), VoltexError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.lifecycle_options.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), VoltexError> {
        info!("Shutting down voltex...");

        // 1. HTTP server, so no new work arrives
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| VoltexError::ShutdownError(e.to_string()))??;
        }

        // 2. Build worker, after its in-flight run settles
        if let Some(handle) = self.build_worker_handle.take() {
            handle.await.map_err(|e| VoltexError::ShutdownError(e.to_string()))?;
        }

        // 3. Delete worker
        if let Some(handle) = self.delete_worker_handle.take() {
            handle.await.map_err(|e| VoltexError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
