//! Container runtime: docker invoked as an external process

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::VoltexError;
use crate::process::{CommandRunner, CommandSpec, NullSink, OutputSink};

/// Container runtime options
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Docker binary
    pub binary: String,

    /// Network containers attach to
    pub network: String,

    /// Restart policy for launched containers
    pub restart_policy: String,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            network: "br0".to_string(),
            restart_policy: "always".to_string(),
        }
    }
}

/// What to launch
#[derive(Debug, Clone)]
pub struct ContainerLaunch<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub address: &'a str,
    pub port: u16,
    /// Host directory mounted at `/appdata`
    pub data_dir: &'a Path,
}

/// Bounds for [`ContainerRuntime::logs`]
#[derive(Debug, Clone, Default)]
pub struct LogWindow {
    pub tail: u32,
    pub since: Option<String>,
    pub until: Option<String>,
}

#[derive(Clone)]
pub struct ContainerRuntime {
    runner: Arc<dyn CommandRunner>,
    options: DockerOptions,
}

impl ContainerRuntime {
    pub fn new(runner: Arc<dyn CommandRunner>, options: DockerOptions) -> Self {
        Self { runner, options }
    }

    fn spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.options.binary, args)
    }

    /// Build the image `tag` from the descriptor in `context_dir`
    pub async fn build_image(
        &self,
        tag: &str,
        context_dir: &Path,
        sink: &dyn OutputSink,
    ) -> Result<(), VoltexError> {
        info!("Building image {} from {}", tag, context_dir.display());
        let spec = self.spec(["build", "-t", tag, "."]).current_dir(context_dir);
        self.runner.run(&spec, sink).await?.check(&spec)?;
        Ok(())
    }

    /// Launch a detached container on the private network
    pub async fn run_container(
        &self,
        launch: &ContainerLaunch<'_>,
        sink: &dyn OutputSink,
    ) -> Result<(), VoltexError> {
        info!(
            "Running container {} ({}) at {}:{}",
            launch.name, launch.image, launch.address, launch.port
        );
        let spec = self.spec([
            "run".to_string(),
            "--name".to_string(),
            launch.name.to_string(),
            "-v".to_string(),
            format!("{}:/appdata", launch.data_dir.display()),
            "--network".to_string(),
            self.options.network.clone(),
            "--ip".to_string(),
            launch.address.to_string(),
            "--expose".to_string(),
            launch.port.to_string(),
            format!("--restart={}", self.options.restart_policy),
            "-d".to_string(),
            launch.image.to_string(),
        ]);
        self.runner.run(&spec, sink).await?.check(&spec)?;
        Ok(())
    }

    /// Start a stopped container
    pub async fn start(&self, container: &str) -> Result<(), VoltexError> {
        let spec = self.spec(["start", container]);
        self.runner.run(&spec, &NullSink).await?.check(&spec)?;
        Ok(())
    }

    /// Runtime state of a container, e.g. `running` or `exited`
    pub async fn status(&self, container: &str) -> Result<String, VoltexError> {
        let spec = self.spec(["inspect", "-f", "{{.State.Status}}", container]);
        let output = self.runner.run(&spec, &NullSink).await?.check(&spec)?;
        Ok(output.stdout.trim().to_string())
    }

    /// Timestamped log lines of a container. Both of its streams are merged.
    pub async fn logs(&self, container: &str, window: &LogWindow) -> Result<String, VoltexError> {
        let mut args = vec![
            "logs".to_string(),
            "--tail".to_string(),
            window.tail.to_string(),
            "-t".to_string(),
        ];
        if let Some(since) = &window.since {
            args.push("--since".to_string());
            args.push(since.clone());
        }
        if let Some(until) = &window.until {
            args.push("--until".to_string());
            args.push(until.clone());
        }
        args.push(container.to_string());

        let spec = self.spec(args);
        let output = self.runner.run(&spec, &NullSink).await?.check(&spec)?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    /// `docker rm -f`
    pub async fn remove_container(&self, container: &str, sink: &dyn OutputSink) -> Result<(), VoltexError> {
        debug!("Removing container {}", container);
        let spec = self.spec(["rm", "-f", container]);
        self.runner.run(&spec, sink).await?.check(&spec)?;
        Ok(())
    }

    /// `docker rmi -f`
    pub async fn remove_image(&self, image: &str, sink: &dyn OutputSink) -> Result<(), VoltexError> {
        debug!("Removing image {}", image);
        let spec = self.spec(["rmi", "-f", image]);
        self.runner.run(&spec, sink).await?.check(&spec)?;
        Ok(())
    }
}
