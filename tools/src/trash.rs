//! Reversible delete.
//!
//! Deleted items are moved to `<workspace>/.trash/<YYYY-MM-DD>/<trash-id>/`
//! next to a `metadata.json` describing where they came from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const TRASH_DIR_NAME: &str = ".trash";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, thiserror::Error)]
pub enum TrashError {
    #[error("Trash item not found: {0}")]
    NotFound(String),
    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Refusing to trash {}", .0.display())]
    InvalidTarget(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid trash metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrashItemType {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashMetadata {
    pub trash_id: String,
    pub original_path: PathBuf,
    /// RFC 3339 timestamp.
    pub deleted_at: String,
    #[serde(rename = "type")]
    pub item_type: TrashItemType,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Trash {
    root: PathBuf,
}

impl Trash {
    #[must_use]
    pub fn new(workspace: &Path) -> Self {
        Self {
            root: workspace.join(TRASH_DIR_NAME),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move a file or directory into the trash.
    pub fn move_to_trash(&self, source: &Path) -> Result<TrashMetadata, TrashError> {
        let meta = match fs::symlink_metadata(source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TrashError::NotFound(source.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if source.starts_with(&self.root) || self.root.starts_with(source) {
            return Err(TrashError::InvalidTarget(source.to_path_buf()));
        }

        let trash_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let item_dir = self
            .root
            .join(now.format("%Y-%m-%d").to_string())
            .join(&trash_id);
        fs::create_dir_all(&item_dir)?;

        let (item_type, sha256) = if meta.is_dir() {
            (TrashItemType::Directory, None)
        } else {
            (TrashItemType::File, Some(hash_file(source)?))
        };
        let metadata = TrashMetadata {
            trash_id,
            original_path: source.to_path_buf(),
            deleted_at: now.to_rfc3339(),
            item_type,
            size: meta.len(),
            sha256,
        };
        fs::write(
            item_dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        let item_name = source
            .file_name()
            .map_or_else(|| "item".into(), std::ffi::OsStr::to_os_string);
        if let Err(e) = fs::rename(source, item_dir.join(item_name)) {
            let _ = fs::remove_dir_all(&item_dir);
            return Err(e.into());
        }

        tracing::info!(trash_id = %metadata.trash_id, path = %source.display(), "Moved to trash");
        Ok(metadata)
    }

    /// All trashed items, newest first.
    pub fn list(&self) -> Result<Vec<TrashMetadata>, TrashError> {
        let mut items = Vec::new();
        for date_dir in subdirectories(&self.root)? {
            for item_dir in subdirectories(&date_dir)? {
                if let Ok(metadata) = read_metadata(&item_dir) {
                    items.push(metadata);
                }
            }
        }
        items.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(items)
    }

    /// Metadata and current location of a trashed item.
    pub fn find(&self, trash_id: &str) -> Result<Option<(TrashMetadata, PathBuf)>, TrashError> {
        if !is_plain_id(trash_id) {
            return Ok(None);
        }
        for date_dir in subdirectories(&self.root)? {
            let item_dir = date_dir.join(trash_id);
            if !item_dir.is_dir() {
                continue;
            }
            let metadata = read_metadata(&item_dir)?;
            for entry in fs::read_dir(&item_dir)? {
                let entry = entry?;
                if entry.file_name() != METADATA_FILE {
                    return Ok(Some((metadata, entry.path())));
                }
            }
        }
        Ok(None)
    }

    /// Move a trashed item back to `to`, or to where it came from.
    ///
    /// Never overwrites: an existing destination is an error.
    pub fn restore(&self, trash_id: &str, to: Option<&Path>) -> Result<PathBuf, TrashError> {
        let (metadata, item_path) = self
            .find(trash_id)?
            .ok_or_else(|| TrashError::NotFound(trash_id.to_string()))?;
        let destination = to.map_or_else(|| metadata.original_path.clone(), Path::to_path_buf);
        if fs::symlink_metadata(&destination).is_ok() {
            return Err(TrashError::AlreadyExists(destination));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&item_path, &destination)?;
        if let Some(item_dir) = item_path.parent() {
            let _ = fs::remove_dir_all(item_dir);
        }
        tracing::info!(trash_id, path = %destination.display(), "Restored from trash");
        Ok(destination)
    }

    /// Permanently delete items trashed more than `older_than` ago, or every
    /// item when `older_than` is `None`. Returns the purged trash ids.
    pub fn purge(&self, older_than: Option<Duration>) -> Result<Vec<String>, TrashError> {
        let cutoff = match older_than {
            None => None,
            Some(age) => {
                let Some(cutoff) = chrono::TimeDelta::from_std(age)
                    .ok()
                    .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
                else {
                    return Ok(Vec::new());
                };
                Some(cutoff)
            }
        };

        let mut purged = Vec::new();
        for date_dir in subdirectories(&self.root)? {
            for item_dir in subdirectories(&date_dir)? {
                let Ok(metadata) = read_metadata(&item_dir) else {
                    continue;
                };
                let expired = cutoff.is_none_or(|cutoff| {
                    chrono::DateTime::parse_from_rfc3339(&metadata.deleted_at)
                        .is_ok_and(|at| at.with_timezone(&chrono::Utc) < cutoff)
                });
                if expired {
                    fs::remove_dir_all(&item_dir)?;
                    purged.push(metadata.trash_id);
                }
            }
            if fs::read_dir(&date_dir)?.next().is_none() {
                let _ = fs::remove_dir(&date_dir);
            }
        }
        tracing::info!(count = purged.len(), "Purged trash");
        Ok(purged)
    }
}

fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, TrashError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn read_metadata(item_dir: &Path) -> Result<TrashMetadata, TrashError> {
    let raw = fs::read_to_string(item_dir.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
