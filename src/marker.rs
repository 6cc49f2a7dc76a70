// Durable pending-update flag. Presence of a file at the configured path
// means "firmware stage done, filesystem stage still owed"; the contents are
// irrelevant. It is the only agent state that must survive power loss.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::UpdateError;

pub const DEFAULT_MARKER_PATH: &str = "/.fs_update_pending";

pub struct PendingMarker {
    path: PathBuf,
}

impl PendingMarker {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the flag and flushes it to storage so it is observable after
    /// an abrupt restart.
    pub fn set(&self) -> Result<(), UpdateError> {
        let file = File::create(&self.path).map_err(UpdateError::MarkerIo)?;
        file.sync_all().map_err(UpdateError::MarkerIo)?;
        Ok(())
    }

    /// Removes the flag. Already-absent is success.
    pub fn clear(&self) -> Result<(), UpdateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UpdateError::MarkerIo(err)),
        }
    }
}
