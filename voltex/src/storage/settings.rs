//! Settings file management

use std::path::PathBuf;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Data directory (storage file, build workspaces, app data, logs)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Reverse proxy configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Container network and address pool
    #[serde(default)]
    pub network: NetworkSettings,

    /// External tool configuration
    #[serde(default)]
    pub tools: ToolSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            data_dir: None,
            server: ServerSettings::default(),
            proxy: ProxySettings::default(),
            network: NetworkSettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    10900
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Directory holding one `<project>.conf` per deployment
    #[serde(default = "default_proxy_config_dir")]
    pub config_dir: PathBuf,

    /// Root of the per-zone certificate directories, as seen by the proxy
    #[serde(default = "default_proxy_ssl_dir")]
    pub ssl_dir: String,

    /// Name of the running proxy container that receives the reload signal
    #[serde(default = "default_proxy_container")]
    pub container: String,

    /// Upstream answering authentication sub-requests
    #[serde(default = "default_auth_upstream")]
    pub auth_upstream: String,
}

fn default_proxy_config_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d/sites")
}

fn default_proxy_ssl_dir() -> String {
    "/etc/nginx/conf.d/ssl".to_string()
}

fn default_proxy_container() -> String {
    "nginx".to_string()
}

fn default_auth_upstream() -> String {
    "172.20.0.101:41001".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            config_dir: default_proxy_config_dir(),
            ssl_dir: default_proxy_ssl_dir(),
            container: default_proxy_container(),
            auth_upstream: default_auth_upstream(),
        }
    }
}

/// Container network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Docker network containers attach to
    #[serde(default = "default_network_name")]
    pub name: String,

    /// Private /16 the allocator draws addresses from
    #[serde(default = "default_subnet")]
    pub subnet: Ipv4Net,

    /// Give up allocating after this many colliding candidates
    #[serde(default = "default_max_allocation_attempts")]
    pub max_allocation_attempts: u32,
}

fn default_network_name() -> String {
    "br0".to_string()
}

fn default_subnet() -> Ipv4Net {
    Ipv4Net::new(std::net::Ipv4Addr::new(172, 20, 0, 0), 16).expect("16 is a valid prefix length")
}

fn default_max_allocation_attempts() -> u32 {
    65_536
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            subnet: default_subnet(),
            max_allocation_attempts: default_max_allocation_attempts(),
        }
    }
}

/// External tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_git_binary")]
    pub git: String,

    #[serde(default = "default_docker_binary")]
    pub docker: String,

    /// Restart policy passed to `docker run --restart`
    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_restart_policy() -> String {
    "always".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            git: default_git_binary(),
            docker: default_docker_binary(),
            restart_policy: default_restart_policy(),
        }
    }
}
