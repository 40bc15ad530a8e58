//! Local state slot.
//!
//! The slot is the single well-known file the tool reads and writes in its
//! working directory. It is never shared between processes.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::document::StateDocument;

/// State file name the tool expects in its working directory.
pub const STATE_FILENAME: &str = "terraform.tfstate";

/// The tool's on-disk state file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStateSlot {
    /// Path to the state file.
    path: PathBuf,
}

impl LocalStateSlot {
    /// Creates the slot for the state file inside `dir`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILENAME),
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, or `None` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns any IO error other than the file not existing.
    pub async fn read(&self) -> io::Result<Option<StateDocument>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(StateDocument::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaces the slot's content with `doc`.
    ///
    /// The document is written to a temp file, synced, then renamed over
    /// the slot, so a crash never leaves a truncated state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write(&self, doc: &StateDocument) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = self.path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp).await?;
        file.write_all(doc.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        debug!("Wrote {} bytes to {}", doc.len(), self.path.display());
        Ok(())
    }

    /// Removes the state file. Removing an empty slot is not an error.
    ///
    /// # Errors
    ///
    /// Returns any IO error other than the file not existing.
    pub async fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Deleted {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
