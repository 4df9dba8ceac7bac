//! Deployment teardown

use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::allocator::AddressAllocator;
use crate::deploy::docker::ContainerRuntime;
use crate::deploy::proxy::ProxyConfigurator;
use crate::errors::VoltexError;
use crate::events::bus::EventBus;
use crate::models::project::DeleteTask;
use crate::utils::generate_id;

/// Settled result of each teardown action. `Ok(false)` means there was
/// nothing to remove.
#[derive(Debug)]
pub struct TeardownReport {
    pub address: Result<bool, VoltexError>,
    pub proxy_config: Result<bool, VoltexError>,
    pub container: Result<bool, VoltexError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.address.is_ok() && self.proxy_config.is_ok() && self.container.is_ok()
    }
}

/// Removes every resource of a deleted project, best effort
#[derive(Clone)]
pub struct Teardown {
    allocator: Arc<AddressAllocator>,
    proxy: ProxyConfigurator,
    runtime: ContainerRuntime,
    bus: Arc<EventBus>,
}

impl Teardown {
    pub fn new(
        allocator: Arc<AddressAllocator>,
        proxy: ProxyConfigurator,
        runtime: ContainerRuntime,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            allocator,
            proxy,
            runtime,
            bus,
        }
    }

    /// Run the three actions concurrently and wait for all of them to settle.
    /// A failing action never cancels the others.
    pub async fn execute(&self, task: &DeleteTask) -> TeardownReport {
        info!("Tearing down project {}", task.project_id);
        let events = self.bus.emitter(&task.project_id, &generate_id());

        let release_address = async {
            match task.container_ip.as_deref() {
                Some(address) => self.allocator.release(address).await.map(|_| true),
                None => Ok(false),
            }
        };

        let remove_proxy_config = async {
            let removed = self.proxy.remove(&task.project_id).await?;
            if removed {
                self.proxy.reload(&events).await;
            }
            Ok::<_, VoltexError>(removed)
        };

        let remove_container = async {
            let mut removed = false;
            if let Some(container) = task.container_id.as_deref() {
                self.runtime.remove_container(container, &events).await?;
                removed = true;
            }
            if let Some(image) = task.container_image_id.as_deref() {
                self.runtime.remove_image(image, &events).await?;
                removed = true;
            }
            Ok::<_, VoltexError>(removed)
        };

        let (address, proxy_config, container) =
            tokio::join!(release_address, remove_proxy_config, remove_container);

        let report = TeardownReport {
            address,
            proxy_config,
            container,
        };
        for (action, result) in [
            ("release address", &report.address),
            ("remove proxy config", &report.proxy_config),
            ("remove container", &report.container),
        ] {
            if let Err(e) = result {
                warn!("Teardown of {}: {} failed: {}", task.project_id, action, e);
                events.error(format!("{} failed: {}", action, e));
            }
        }
        // Dropped last so the output above does not recreate the entry
        self.bus.capture().forget(&task.project_id);
        info!("Teardown of project {} settled", task.project_id);
        report
    }
}
