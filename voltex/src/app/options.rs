//! Application configuration options

use std::time::Duration;

use crate::deploy::allocator::AllocatorOptions;
use crate::deploy::docker::DockerOptions;
use crate::deploy::proxy::{ProxyOptions, SiteTemplate};
use crate::errors::VoltexError;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Data directory layout
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Container runtime
    pub docker: DockerOptions,

    /// Git binary
    pub git_binary: String,

    /// Reverse proxy
    pub proxy: ProxyOptions,

    /// Address pool
    pub allocator: AllocatorOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::with_allocator(&Settings::default(), AllocatorOptions::default())
    }
}

impl TryFrom<&Settings> for AppOptions {
    type Error = VoltexError;

    fn try_from(settings: &Settings) -> Result<Self, VoltexError> {
        let allocator = AllocatorOptions::new(settings.network.subnet, settings.network.max_allocation_attempts)?;
        Ok(Self::with_allocator(settings, allocator))
    }
}

impl AppOptions {
    fn with_allocator(settings: &Settings, allocator: AllocatorOptions) -> Self {
        let layout = settings
            .data_dir
            .as_ref()
            .map(|dir| StorageLayout::new(dir.clone()))
            .unwrap_or_default();

        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            docker: DockerOptions {
                binary: settings.tools.docker.clone(),
                network: settings.network.name.clone(),
                restart_policy: settings.tools.restart_policy.clone(),
            },
            git_binary: settings.tools.git.clone(),
            proxy: ProxyOptions {
                config_dir: settings.proxy.config_dir.clone(),
                container: settings.proxy.container.clone(),
                docker_binary: settings.tools.docker.clone(),
                template: SiteTemplate {
                    ssl_dir: settings.proxy.ssl_dir.clone(),
                    auth_upstream: settings.proxy.auth_upstream.clone(),
                },
            },
            allocator,
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including the in-flight build
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(600),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10900,
        }
    }
}
