//! Project, build and teardown models

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::errors::VoltexError;

/// Snapshot scope of project records, keyed by project id
pub const PROJECTS_SCOPE: &str = "projects";

/// Key inside [`PROJECTS_SCOPE`] holding the list of all project ids
pub const PROJECT_INDEX_KEY: &str = "id";

/// Snapshot scope of [`DeployRecord`]s, keyed by project id
pub const DEPLOY_SCOPE: &str = "project-deploy";

/// How to build and publish a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecipe {
    /// Source repository URL
    pub git_url: String,

    /// Base image of the generated build descriptor
    pub docker_from: String,

    /// Build instructions inserted after `COPY . .`
    pub docker_script: String,

    /// Container start command
    pub start_command: String,

    /// Port the application listens on inside the container
    pub expose_port: u16,

    /// Domain the proxy publishes the deployment under
    pub alloc_domain: String,

    /// Gate the domain behind the authentication service
    pub require_passkey_auth: bool,
}

/// Persisted record of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub recipe: BuildRecipe,

    /// Live container, null until the first successful build
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
    pub container_image_id: Option<String>,
}

impl Project {
    /// A build request that replaces this project's current container
    pub fn build_query(&self, force_ip: Option<String>) -> BuildQuery {
        BuildQuery {
            project_id: self.id.clone(),
            recipe: self.recipe.clone(),
            force_ip,
            old_container_id: self.container_id.clone(),
            old_container_ip: self.container_ip.clone(),
            old_container_image_id: self.container_image_id.clone(),
        }
    }

    /// Everything that must be torn down with this project
    pub fn delete_task(&self) -> DeleteTask {
        DeleteTask {
            project_id: self.id.clone(),
            container_id: self.container_id.clone(),
            container_ip: self.container_ip.clone(),
            container_image_id: self.container_image_id.clone(),
        }
    }
}

/// Immutable input of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildQuery {
    pub project_id: String,
    pub recipe: BuildRecipe,

    /// Pinned address, reserved without a collision check
    pub force_ip: Option<String>,

    /// Identity of the deployment being replaced, all null on a first build
    pub old_container_id: Option<String>,
    pub old_container_ip: Option<String>,
    pub old_container_image_id: Option<String>,
}

/// A teardown request, consumed once by the delete queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTask {
    pub project_id: String,
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
    pub container_image_id: Option<String>,
}

/// Source commit and run behind the live deployment of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub git_hash: Option<String>,
    pub build_id: String,
}

/// Create or update body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub git_url: Option<String>,
    pub docker_from: Option<String>,
    pub docker_script: Option<String>,
    pub start_command: Option<String>,
    /// Accepted as a number or a numeric string
    pub expose_port: Option<serde_json::Value>,
    pub alloc_domain: Option<String>,
    pub require_passkey_auth: Option<bool>,
    /// Pinned address for the first build
    pub force_ip: Option<String>,
}

/// Fields of a validated [`ProjectRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProject {
    pub name: String,
    pub description: Option<String>,
    pub recipe: BuildRecipe,
    pub force_ip: Option<String>,
}

fn required(field: &str, value: Option<String>) -> Result<String, VoltexError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(VoltexError::ValidationError(format!("Missing required field: {}", field))),
    }
}

fn parse_port(value: Option<serde_json::Value>) -> Result<u16, VoltexError> {
    let invalid = || VoltexError::ValidationError("expose_port must be a port number".to_string());
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p > 0)
            .ok_or_else(invalid),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u16>().ok().filter(|p| *p > 0).ok_or_else(invalid),
        Some(_) => Err(invalid()),
        None => Err(VoltexError::ValidationError(
            "Missing required field: expose_port".to_string(),
        )),
    }
}

/// Check a pinned address is a literal IPv4 address
pub fn validate_force_ip(value: Option<String>) -> Result<Option<String>, VoltexError> {
    match value {
        Some(ip) if !ip.trim().is_empty() => {
            let parsed: Ipv4Addr = ip
                .trim()
                .parse()
                .map_err(|_| VoltexError::ValidationError(format!("Invalid force_ip: {}", ip)))?;
            Ok(Some(parsed.to_string()))
        }
        _ => Ok(None),
    }
}

impl ProjectRequest {
    pub fn validate(self) -> Result<ValidatedProject, VoltexError> {
        let name = required("name", self.name)?;
        let git_url = required("git_url", self.git_url)?;
        let docker_script = required("docker_script", self.docker_script)?;
        let start_command = required("start_command", self.start_command)?;
        let expose_port = parse_port(self.expose_port)?;
        let alloc_domain = required("alloc_domain", self.alloc_domain)?;
        let docker_from = required("docker_from", self.docker_from)?;
        let require_passkey_auth = self.require_passkey_auth.ok_or_else(|| {
            VoltexError::ValidationError("Missing required field: require_passkey_auth".to_string())
        })?;
        let force_ip = validate_force_ip(self.force_ip)?;

        Ok(ValidatedProject {
            name,
            description: self.description.filter(|d| !d.is_empty()),
            recipe: BuildRecipe {
                git_url,
                docker_from,
                docker_script,
                start_command,
                expose_port,
                alloc_domain,
                require_passkey_auth,
            },
            force_ip,
        })
    }
}
