//! Manifest staging into an install directory

use crate::error::{PackError, PackResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files copied from a source directory into a target directory for the
/// duration of an install, then removed so only installed output remains
#[derive(Debug)]
pub struct TemporaryCopy {
    source_dir: PathBuf,
    target_dir: PathBuf,
    files: Vec<String>,
}

impl TemporaryCopy {
    pub fn new(source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            files: Vec::new(),
        }
    }

    /// Register a file; a missing required file is an error, a missing
    /// optional one is skipped
    pub fn add(&mut self, filename: &str, required: bool) -> PackResult<()> {
        let source = self.source_dir.join(filename);
        if source.exists() {
            self.files.push(filename.to_string());
            Ok(())
        } else if required {
            Err(PackError::ManifestNotFound(source))
        } else {
            Ok(())
        }
    }

    /// Whether `filename` was registered
    pub fn contains(&self, filename: &str) -> bool {
        self.files.iter().any(|f| f == filename)
    }

    /// Copy every registered file into the target directory
    pub fn copy_to_target_dir(&self) -> PackResult<()> {
        for filename in &self.files {
            info!("Copying temporarily '{}'", filename);
            let source = self.source_dir.join(filename);
            fs::copy(&source, self.target_dir.join(filename))
                .map_err(|e| PackError::io(format!("copying {}", source.display()), e))?;
        }
        Ok(())
    }

    /// Remove every registered file from the target directory
    pub fn remove_from_target_dir(&self) -> PackResult<()> {
        for filename in &self.files {
            info!("Removing temporarily copied '{}'", filename);
            remove_if_exists(&self.target_dir.join(filename))?;
        }
        Ok(())
    }
}

/// Remove a file, treating an already missing file as success
pub fn remove_if_exists(path: &Path) -> PackResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PackError::io(format!("removing {}", path.display()), e)),
    }
}
