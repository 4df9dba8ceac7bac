//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::VoltexError;
use crate::server::handlers::{
    api_root_handler, create_project_handler, delete_project_handler, deployment_handler, events_handler,
    health_handler, list_projects_handler, logs_handler, project_handler, rebuild_project_handler, start_handler,
    status_handler, update_project_handler, version_handler,
};
use crate::server::state::ServerState;

/// All routes of the API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route("/api", get(api_root_handler))
        .route("/api/projects/list", get(list_projects_handler))
        .route("/api/projects/create", post(create_project_handler))
        .route("/api/projects/rebuild/{id}", post(rebuild_project_handler))
        .route("/api/projects/update/{id}", post(update_project_handler))
        .route("/api/projects/delete/{id}", post(delete_project_handler))
        // Containers
        .route("/api/projects/status/{id}", get(status_handler))
        .route("/api/projects/start/{id}", get(start_handler))
        .route("/api/projects/logs/{id}", get(logs_handler))
        // Deployments
        .route("/api/projects/events/{id}", get(events_handler))
        .route("/api/projects/deployment/{id}", get(deployment_handler))
        .route("/api/projects/{id}", get(project_handler))
        // State and middleware
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), VoltexError>>, VoltexError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| VoltexError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| VoltexError::ServerError(e.to_string()))
    });

    Ok(handle)
}
