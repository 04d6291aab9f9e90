//! Local image reconciliation: snapshot against change-cache.
//!
//! Two passes. The first walks the snapshot files on a worker pool, checksumming new and changed
//! files and flagging them for upload. The second walks the cache and flags every record whose
//! file is gone for deletion; absence can only be detected from the cache side.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::contract::{CategoryStore, ChecksumProvider, ImageStore};
use crate::error::SyncError;
use crate::model::{FilesystemNode, ImageRecord};
use crate::scan::Snapshot;
use crate::worker_pool::run_pool;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalImageSyncReport {
    pub scanned: usize,
    pub unchanged: usize,
    /// New or changed files written to the cache.
    pub updated: usize,
    /// Files skipped because they could not be checksummed.
    pub failed: usize,
    pub marked_for_deletion: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeOutcome {
    Unchanged,
    Updated,
    Skipped,
}

pub async fn synchronize_local_images(
    snapshot: &Snapshot,
    categories: Arc<dyn CategoryStore>,
    images: Arc<dyn ImageStore>,
    checksums: Arc<dyn ChecksumProvider>,
    workers: usize,
) -> Result<LocalImageSyncReport, SyncError> {
    debug!("[LOCAL] Entering local image synchronisation");
    let files: Vec<FilesystemNode> = snapshot.values().filter(|n| !n.is_dir).cloned().collect();
    let mut report = LocalImageSyncReport {
        scanned: files.len(),
        ..Default::default()
    };
    info!(files = files.len(), workers, "[LOCAL] Reconciling local files");

    let pool_images = Arc::clone(&images);
    let outcomes = run_pool(workers, files, move |node: FilesystemNode| {
        let categories = Arc::clone(&categories);
        let images = Arc::clone(&pool_images);
        let checksums = Arc::clone(&checksums);
        async move {
            tokio::task::spawn_blocking(move || {
                reconcile_node(&node, categories.as_ref(), images.as_ref(), checksums.as_ref())
            })
            .await
            .map_err(|e| SyncError::WorkerJoin(e.to_string()))?
        }
    })
    .await?;

    let mut first_failure = None;
    for outcome in outcomes {
        match outcome {
            Ok(NodeOutcome::Unchanged) => report.unchanged += 1,
            Ok(NodeOutcome::Updated) => report.updated += 1,
            Ok(NodeOutcome::Skipped) => report.failed += 1,
            Err(e) => {
                error!(error = %e, "[LOCAL] Cache write failed");
                report.failed += 1;
                first_failure.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_failure {
        return Err(e);
    }

    report.marked_for_deletion = mark_vanished_images(images.as_ref())?;

    info!(
        scanned = report.scanned,
        unchanged = report.unchanged,
        updated = report.updated,
        failed = report.failed,
        marked_for_deletion = report.marked_for_deletion,
        "[LOCAL] Local image synchronisation complete"
    );
    Ok(report)
}

fn reconcile_node(
    node: &FilesystemNode,
    categories: &dyn CategoryStore,
    images: &dyn ImageStore,
    checksums: &dyn ChecksumProvider,
) -> Result<NodeOutcome, SyncError> {
    let mut record = match images.get_image_by_path(&node.path)? {
        Some(cached) if cached.last_change == node.modified && !cached.delete_required => {
            return Ok(NodeOutcome::Unchanged);
        }
        Some(cached) => cached,
        None => ImageRecord::new_for(node, 0),
    };

    if record.category_remote_id == 0 {
        record.category_remote_id = category_remote_id(node, categories)?;
    }

    let checksum = match checksums.checksum(&node.path) {
        Ok(checksum) => checksum,
        Err(e) => {
            warn!(path = %node.path.display(), error = %e, "[LOCAL] Could not checksum file, skipping");
            return Ok(NodeOutcome::Skipped);
        }
    };

    let modified_changed = record.last_change != node.modified;
    record.checksum = checksum;
    record.last_change = node.modified;
    record.upload_required = modified_changed || record.remote_id == 0;
    record.delete_required = false;

    debug!(path = %node.path.display(), upload_required = record.upload_required, "[LOCAL] Saving image metadata");
    images.save_image(&record)?;
    Ok(NodeOutcome::Updated)
}

fn category_remote_id(node: &FilesystemNode, categories: &dyn CategoryStore) -> Result<i64, SyncError> {
    let parent = node.parent_key();
    if parent.is_empty() {
        return Ok(0);
    }
    match categories.get_category_by_key(parent)? {
        Some(category) => Ok(category.remote_id),
        None => {
            warn!(path = %node.path.display(), category = parent, "[LOCAL] No category for image, it will not be placed in an album");
            Ok(0)
        }
    }
}

fn mark_vanished_images(images: &dyn ImageStore) -> Result<usize, SyncError> {
    let mut marked = 0;
    for mut record in images.list_all_images()? {
        if record.delete_required || record.full_path.exists() {
            continue;
        }
        debug!(path = %record.full_path.display(), remote_id = record.remote_id, "[LOCAL] File is gone, marking for deletion");
        record.mark_for_deletion();
        images.save_image(&record)?;
        marked += 1;
    }
    Ok(marked)
}
