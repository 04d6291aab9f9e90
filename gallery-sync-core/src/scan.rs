//! Filesystem snapshot and content checksums.
//!
//! [`scan_local_tree`] walks the root once per run and returns an ordered, immutable map of
//! root-relative key to [`FilesystemNode`]. [`Md5Checksum`] is the production [`ChecksumProvider`].

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::contract::ChecksumProvider;
use crate::error::SyncError;
use crate::model::{FilesystemNode, KEY_SEPARATOR};

/// Ordered snapshot of the local tree, keyed by root-relative path.
pub type Snapshot = BTreeMap<String, FilesystemNode>;

/// Walks `root` and collects every directory and every image file with one of `extensions`.
///
/// Hidden entries are skipped and directories named in `ignore_dirs` are pruned with their
/// whole subtree. Entries that cannot be read, and entries whose name is not valid UTF-8, are
/// logged and left out of the snapshot: every path kept must round-trip through the cache and
/// the gallery unchanged.
pub fn scan_local_tree(
    root: &Path,
    extensions: &[String],
    ignore_dirs: &[String],
) -> Result<Snapshot, SyncError> {
    let root = root.canonicalize().map_err(|e| SyncError::Scan {
        root: root.to_path_buf(),
        message: e.to_string(),
    })?;
    if !root.is_dir() {
        return Err(SyncError::Scan {
            root,
            message: "not a directory".to_string(),
        });
    }
    if root.to_str().is_none() {
        return Err(SyncError::Scan {
            root,
            message: "path is not valid UTF-8".to_string(),
        });
    }
    info!(root = %root.display(), "[SCAN] Scanning local tree");

    let mut snapshot = Snapshot::new();
    let walker = WalkDir::new(&root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| has_utf8_name(e) && !is_hidden(e) && !is_ignored_dir(e, ignore_dirs));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "[SCAN] Skipping unreadable entry");
                continue;
            }
        };

        let is_dir = entry.file_type().is_dir();
        if !is_dir && !has_extension(entry.path(), extensions) {
            continue;
        }

        let modified = match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "[SCAN] Skipping entry without modification time");
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let mut key = String::new();
        for component in relative.components() {
            if !key.is_empty() {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&component.as_os_str().to_string_lossy());
        }

        snapshot.insert(
            key.clone(),
            FilesystemNode {
                key,
                path: entry.path().to_path_buf(),
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
                modified,
            },
        );
    }

    debug!(nodes = snapshot.len(), "[SCAN] Snapshot complete");
    Ok(snapshot)
}

fn has_utf8_name(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || entry.file_name().to_str().is_some() {
        return true;
    }
    warn!(path = %entry.path().display(), "[SCAN] Skipping entry whose name is not valid UTF-8");
    false
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

fn is_ignored_dir(entry: &DirEntry, ignore_dirs: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| ignore_dirs.iter().any(|ignored| ignored == name))
            .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// MD5 of the file content as lowercase hex, the key the gallery uses for existence checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Checksum;

impl ChecksumProvider for Md5Checksum {
    fn checksum(&self, path: &Path) -> io::Result<String> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Md5::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}
