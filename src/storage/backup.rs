//! Dated backups and the stable pointer to the latest version.
//!
//! Every publish writes a new backup named after the current date
//! (`doughnut-20240131.csv`) and then swaps the stable path over to it. The
//! stable path is a relative symlink; it is replaced by creating the new link
//! under a temporary name and renaming it over the old one, so readers only
//! ever see the previous or the new version.

use std::path::{Component, Path, PathBuf};

use chrono::{Local, NaiveDate};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that can occur while publishing a file.
#[derive(Debug, Error)]
pub enum PublishError {
    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stable path exists but cannot be replaced by a pointer.
    #[error("Cannot publish to {}: {reason}", .path.display())]
    InvalidTarget { path: PathBuf, reason: String },
}

/// Writes `contents` to `path` through a temporary sibling file and a rename.
///
/// Parent directories are created as needed. An existing file at `path` is
/// replaced.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_sibling(path);
    let result = (|| {
        use std::io::Write;
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// SHA-256 of `contents` as lowercase hex.
pub fn content_digest(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp.{}", name, Uuid::new_v4()))
}

/// Publishes successive versions of a file as dated backups behind a stable path.
#[derive(Debug, Clone)]
pub struct BackupPublisher {
    target: PathBuf,
    backup_dir: PathBuf,
}

impl BackupPublisher {
    /// Creates a publisher for `target`, keeping backups in `backup_dir`.
    pub fn new(target: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// The stable path readers open.
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Backup file used for versions published on `date`.
    pub fn backup_path(&self, date: NaiveDate) -> PathBuf {
        let stem = self
            .target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = self
            .target
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.backup_dir
            .join(format!("{}-{}{}", stem, date.format("%Y%m%d"), ext))
    }

    /// Contents currently behind the stable path, if any.
    pub fn read_current(&self) -> Result<Option<Vec<u8>>, PublishError> {
        match std::fs::read(&self.target) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Publishes `contents` as today's backup and points the stable path at it.
    ///
    /// Returns the path of the backup written.
    pub fn publish(&self, contents: &[u8]) -> Result<PathBuf, PublishError> {
        self.publish_on(contents, Local::now().date_naive())
    }

    /// Publishes `contents` as the backup for `date`. A backup already written
    /// on the same date is overwritten; older backups are never touched.
    pub fn publish_on(&self, contents: &[u8], date: NaiveDate) -> Result<PathBuf, PublishError> {
        self.check_target()?;

        let backup_path = self.backup_path(date);
        write_atomic(&backup_path, contents)?;
        debug!(path = %backup_path.display(), "Wrote backup");

        let preserved = self.move_aside_regular_file()?;
        if let Err(e) = self.repoint(&backup_path, contents) {
            if let Some(preserved) = preserved {
                if let Err(restore) = std::fs::rename(&preserved, &self.target) {
                    warn!(
                        preserved = %preserved.display(),
                        error = %restore,
                        "Failed to restore previous file at the stable path"
                    );
                }
            }
            return Err(e);
        }

        info!(
            target = %self.target.display(),
            backup = %backup_path.display(),
            sha256 = %content_digest(contents),
            "Published new version"
        );
        Ok(backup_path)
    }

    /// Rejects a stable path that can never hold a pointer.
    fn check_target(&self) -> Result<(), PublishError> {
        match std::fs::symlink_metadata(&self.target) {
            Ok(meta) if meta.is_dir() => Err(PublishError::InvalidTarget {
                path: self.target.clone(),
                reason: "path is a directory".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a pre-existing regular file at the stable path into the backup
    /// directory so that replacing it with a pointer loses nothing.
    ///
    /// Returns where the file was moved, if anything was moved.
    fn move_aside_regular_file(&self) -> Result<Option<PathBuf>, PublishError> {
        let meta = match std::fs::symlink_metadata(&self.target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() || cfg!(not(unix)) {
            return Ok(None);
        }

        let stem = self
            .target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = self
            .target
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let preserved = self.backup_dir.join(format!(
            "{}-preexisting-{}{}",
            stem,
            Local::now().format("%Y%m%d%H%M%S"),
            ext
        ));
        std::fs::create_dir_all(&self.backup_dir)?;
        std::fs::rename(&self.target, &preserved)?;
        warn!(
            target = %self.target.display(),
            preserved = %preserved.display(),
            "Stable path was a regular file; moved it into the backup directory"
        );
        Ok(Some(preserved))
    }

    #[cfg(unix)]
    fn repoint(&self, backup_path: &Path, _contents: &[u8]) -> Result<(), PublishError> {
        let parent = self
            .target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let link = relative_path(parent, backup_path)
            .unwrap_or_else(|| std::fs::canonicalize(backup_path).unwrap_or(backup_path.to_path_buf()));

        let temp_link = temp_sibling(&self.target);
        std::os::unix::fs::symlink(&link, &temp_link)?;
        if let Err(e) = std::fs::rename(&temp_link, &self.target) {
            let _ = std::fs::remove_file(&temp_link);
            return Err(e.into());
        }
        debug!(target = %self.target.display(), link = %link.display(), "Repointed symlink");
        Ok(())
    }

    #[cfg(not(unix))]
    fn repoint(&self, _backup_path: &Path, contents: &[u8]) -> Result<(), PublishError> {
        write_atomic(&self.target, contents)?;
        Ok(())
    }
}

/// Path of `to` relative to the directory `from_dir`.
///
/// Returns `None` when both paths are not anchored the same way or `from_dir`
/// contains `..` after their common prefix.
fn relative_path(from_dir: &Path, to: &Path) -> Option<PathBuf> {
    if from_dir.is_absolute() != to.is_absolute() {
        return None;
    }

    let from: Vec<Component> = from_dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let to_components: Vec<Component> = to
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    let common = from
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if from[common..].iter().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to_components[common..] {
        relative.push(component.as_os_str());
    }
    Some(relative)
}
