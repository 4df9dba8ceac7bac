//! Source control: clone a repository and resolve its head commit

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::errors::VoltexError;
use crate::process::{CommandRunner, CommandSpec, NullSink, OutputSink};

/// Git invoked as an external process
#[derive(Clone)]
pub struct SourceControl {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl SourceControl {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    /// Clone `repo_url` into `target_dir`, streaming git's output to `sink`
    pub async fn clone_repository(
        &self,
        repo_url: &str,
        target_dir: &Path,
        sink: &dyn OutputSink,
    ) -> Result<(), VoltexError> {
        info!("Cloning {} into {}", repo_url, target_dir.display());

        let mut spec = CommandSpec::new(
            &self.binary,
            [
                "clone".to_string(),
                repo_url.to_string(),
                target_dir.to_string_lossy().into_owned(),
            ],
        );
        if let Some(parent) = target_dir.parent() {
            spec = spec.current_dir(parent);
        }

        self.runner.run(&spec, sink).await?.check(&spec)?;
        Ok(())
    }

    /// Resolve the commit hash checked out in `repo_dir`
    pub async fn head_commit(&self, repo_dir: &Path) -> Result<String, VoltexError> {
        let spec = CommandSpec::new(&self.binary, ["rev-parse", "HEAD"]).current_dir(repo_dir);
        let output = self.runner.run(&spec, &NullSink).await?.check(&spec)?;

        let hash = output.stdout.trim().to_string();
        if hash.is_empty() {
            return Err(VoltexError::ProcessError(
                "git rev-parse printed no commit hash".to_string(),
            ));
        }
        Ok(hash)
    }
}
