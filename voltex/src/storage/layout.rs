//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::VoltexError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of a voltex data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The snapshot store file
    pub fn storage_file(&self) -> File {
        File::new(self.base_dir.join("storage.json"))
    }

    /// Default settings file location
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Scratch directory holding one workspace per build run
    pub fn builders_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp").join("builders"))
    }

    /// Workspace of a single build run
    pub fn run_workspace(&self, project_id: &str, run_id: &str) -> Dir {
        self.builders_dir().subdir(project_id).subdir(run_id)
    }

    /// Parent of the per-project data directories
    pub fn app_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("app"))
    }

    /// Private data directory of one deployment, mounted into its container
    pub fn project_data_dir(&self, project_id: &str) -> Dir {
        self.app_dir().subdir(project_id)
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), VoltexError> {
        self.builders_dir().create().await?;
        self.app_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/voltex");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".voltex");

        Self::new(base_dir)
    }
}
