//! Build worker: runs queued pipeline runs one at a time

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::deploy::pipeline::{BuildPipeline, BuildRun};
use crate::workers::queue::{work_queue, QueueReceiver, WorkQueue};

/// Producer side of the build queue. Yields the finished run.
pub type BuildQueue = WorkQueue<BuildRun, BuildRun>;

/// Consumer side of the build queue
pub type BuildReceiver = QueueReceiver<BuildRun, BuildRun>;

pub fn build_queue() -> (BuildQueue, BuildReceiver) {
    work_queue("build")
}

/// Run the build worker until shutdown
pub async fn run(
    receiver: BuildReceiver,
    pipeline: BuildPipeline,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Build worker starting...");

    receiver
        .drain(
            move |mut run: BuildRun| {
                let pipeline = pipeline.clone();
                async move {
                    let outcome = pipeline.execute(&mut run).await;
                    match outcome.error_text() {
                        None => info!("Build {} of {} succeeded", run.id(), run.project_id()),
                        Some(e) => warn!("Build {} of {} failed: {}", run.id(), run.project_id(), e),
                    }
                    run
                }
            },
            shutdown_signal,
        )
        .await;

    info!("Build worker stopped");
}
