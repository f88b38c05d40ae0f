//! Exclusive, all-or-nothing ownership of an output path.
//!
//! [`OutputStaging::acquire`] moves whatever occupies the target aside and
//! hands out a fresh sibling directory to write into. [`OutputStaging::commit`]
//! renames that directory onto the target; dropping the guard instead throws
//! the staged output away and puts the previous occupant back.
//!
//! Two guards on the same target at once are not supported.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{PhantomError, Result};

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{suffix}-{}", std::process::id()));
    target.with_file_name(name)
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[derive(Debug)]
pub struct OutputStaging {
    target: PathBuf,
    staging: PathBuf,
    backup: Option<PathBuf>,
    committed: bool,
}

impl OutputStaging {
    /// Take ownership of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`PhantomError::StoreConflict`] if `target` exists and cannot be
    /// moved aside; nothing is deleted in that case.
    pub fn acquire(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        if target.file_name().is_none() {
            return Err(PhantomError::StoreConflict {
                path: target,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            });
        }

        let backup = if target.exists() {
            let backup = sibling(&target, "previous");
            if backup.exists() {
                remove_path(&backup).map_err(|e| PhantomError::StoreConflict {
                    path: backup.clone(),
                    source: e,
                })?;
            }
            fs::rename(&target, &backup).map_err(|e| PhantomError::StoreConflict {
                path: target.clone(),
                source: e,
            })?;
            Some(backup)
        } else {
            None
        };

        let guard = Self {
            staging: sibling(&target, "staging"),
            target,
            backup,
            committed: false,
        };

        if guard.staging.exists() {
            remove_path(&guard.staging).map_err(|e| PhantomError::io(&guard.staging, e))?;
        }
        if let Some(parent) = guard.staging.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PhantomError::io(parent, e))?;
        }
        // dropping `guard` on error restores the backup
        fs::create_dir(&guard.staging).map_err(|e| PhantomError::io(&guard.staging, e))?;
        Ok(guard)
    }

    /// Directory to write the new output into.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Publish the staged output at the target path.
    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.staging, &self.target).map_err(|e| PhantomError::io(&self.target, e))?;
        self.committed = true;

        if let Some(backup) = self.backup.take() {
            if let Err(e) = remove_path(&backup) {
                warn!("could not remove previous output {}: {e}", backup.display());
            }
        }
        info!("published {}", self.target.display());
        Ok(self.target.clone())
    }
}

impl Drop for OutputStaging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.staging.exists() {
            if let Err(e) = remove_path(&self.staging) {
                warn!("could not remove staging output {}: {e}", self.staging.display());
            }
        }
        if let Some(backup) = self.backup.take() {
            if let Err(e) = fs::rename(&backup, &self.target) {
                warn!(
                    "could not restore {} from {}: {e}",
                    self.target.display(),
                    backup.display()
                );
            }
        }
    }
}

/// A single file written beside its target and renamed into place on commit.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    temp: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn write(target: impl AsRef<Path>, write: impl FnOnce(&Path) -> Result<()>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PhantomError::io(parent, e))?;
        }
        let staged = Self {
            temp: sibling(&target, "tmp"),
            target,
            committed: false,
        };
        write(&staged.temp)?;
        Ok(staged)
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.temp, &self.target).map_err(|e| PhantomError::io(&self.target, e))?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed && self.temp.exists() {
            if let Err(e) = fs::remove_file(&self.temp) {
                warn!("could not remove {}: {e}", self.temp.display());
            }
        }
    }
}
