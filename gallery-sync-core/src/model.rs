//! Records persisted by the change-cache and the per-run filesystem node.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Separator used in every hierarchical key, local or remote.
pub const KEY_SEPARATOR: char = '/';

/// Returns the parent part of a hierarchical key, or `None` for a top-level key.
pub fn parent_key(key: &str) -> Option<&str> {
    key.rsplit_once(KEY_SEPARATOR)
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// A directory or file found by the filesystem snapshot. Recomputed on every run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemNode {
    /// Root-relative path with `/` separators; the join key to categories and images.
    pub key: String,
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
}

impl FilesystemNode {
    /// Key of the directory holding this node; empty for nodes directly below the root.
    pub fn parent_key(&self) -> &str {
        parent_key(&self.key).unwrap_or("")
    }
}

/// A gallery album mirrored from a local directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryRecord {
    /// Row id in the cache; 0 until the record has been inserted.
    pub local_id: i64,
    /// Id assigned by the gallery; 0 while the album does not exist remotely.
    pub remote_id: i64,
    pub remote_parent_id: i64,
    pub name: String,
    pub key: String,
}

impl CategoryRecord {
    /// A category discovered locally that still has to be created on the gallery.
    pub fn pending(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_created(&self) -> bool {
        self.remote_id > 0
    }

    /// Key of the parent category, `None` for root categories.
    ///
    /// A category whose key equals its name is a root category even if the name
    /// itself contains a separator.
    pub fn parent_key(&self) -> Option<&str> {
        if self.key == self.name {
            return None;
        }
        parent_key(&self.key)
    }
}

impl fmt::Display for CategoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CategoryRecord{{local_id:{}, remote_id:{}, remote_parent_id:{}, name:{}, key:{}}}",
            self.local_id, self.remote_id, self.remote_parent_id, self.name, self.key
        )
    }
}

/// Cached metadata of a single image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub local_id: i64,
    pub remote_id: i64,
    pub full_path: PathBuf,
    pub filename: String,
    pub checksum: String,
    pub last_change: DateTime<Utc>,
    pub category_key: String,
    pub category_remote_id: i64,
    pub upload_required: bool,
    pub delete_required: bool,
}

impl ImageRecord {
    /// A record for a file seen for the first time. Checksum and flags are filled in by the scan.
    pub fn new_for(node: &FilesystemNode, category_remote_id: i64) -> Self {
        Self {
            local_id: 0,
            remote_id: 0,
            full_path: node.path.clone(),
            filename: node.name.clone(),
            checksum: String::new(),
            last_change: node.modified,
            category_key: node.parent_key().to_string(),
            category_remote_id,
            upload_required: false,
            delete_required: false,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.remote_id > 0
    }

    /// Flags the record as gone from disk. Clears any pending upload.
    pub fn mark_for_deletion(&mut self) {
        self.upload_required = false;
        self.delete_required = true;
    }
}

impl fmt::Display for ImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageRecord{{local_id:{}, remote_id:{}, category_remote_id:{}, path:{}, checksum:{}, changed:{}, upload:{}, delete:{}}}",
            self.local_id,
            self.remote_id,
            self.category_remote_id,
            self.full_path.display(),
            self.checksum,
            self.last_change.to_rfc3339(),
            self.upload_required,
            self.delete_required
        )
    }
}
