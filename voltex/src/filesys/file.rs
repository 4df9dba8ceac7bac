//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::VoltexError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, VoltexError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, VoltexError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write string to file, creating parent directories as needed
    pub async fn write_string(&self, contents: &str) -> Result<(), VoltexError> {
        self.ensure_parent().await?;

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Replace the file contents through a temporary sibling and a rename,
    /// so a crash mid-write never leaves a truncated file behind
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), VoltexError> {
        self.ensure_parent().await?;
        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Delete the file. Returns whether a file was actually removed.
    pub async fn delete(&self) -> Result<bool, VoltexError> {
        if !self.exists().await {
            return Ok(false);
        }
        fs::remove_file(&self.path).await?;
        Ok(true)
    }

    async fn ensure_parent(&self) -> Result<(), VoltexError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}
