//! Delete worker: tears down deleted projects one at a time

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::deploy::teardown::{Teardown, TeardownReport};
use crate::models::project::DeleteTask;
use crate::workers::queue::{work_queue, QueueReceiver, WorkQueue};

pub type DeleteQueue = WorkQueue<DeleteTask, TeardownReport>;

pub type DeleteReceiver = QueueReceiver<DeleteTask, TeardownReport>;

pub fn delete_queue() -> (DeleteQueue, DeleteReceiver) {
    work_queue("delete")
}

/// Run the delete worker until shutdown
pub async fn run(
    receiver: DeleteReceiver,
    teardown: Teardown,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Delete worker starting...");

    receiver
        .drain(
            move |task: DeleteTask| {
                let teardown = teardown.clone();
                async move {
                    let report = teardown.execute(&task).await;
                    if !report.is_clean() {
                        warn!("Teardown of {} finished with errors", task.project_id);
                    }
                    report
                }
            },
            shutdown_signal,
        )
        .await;

    info!("Delete worker stopped");
}
