//! Remote image reconciliation: pending uploads against what the gallery already holds.
//!
//! Records never uploaded are looked up by checksum in batches of [`EXISTENCE_BATCH_SIZE`].
//! Records with a remote id are compared one by one with the stored remote file. Anything the
//! gallery already has is taken off the upload queue; everything else is left for the executor.

use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::contract::{ImageApi, ImageStore, RemoteFileState};
use crate::error::SyncError;

/// Checksums per existence query. Keeps request bodies well below common upstream limits.
pub const EXISTENCE_BATCH_SIZE: usize = 2000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoteImageSyncReport {
    /// Cache records linked to an image that already existed on the gallery.
    pub found_remote: usize,
    /// Revisions whose remote content turned out to be identical.
    pub unchanged_remote: usize,
    /// Per-image checks that failed and were skipped.
    pub check_failures: usize,
}

pub async fn synchronize_remote_images(
    images: &dyn ImageStore,
    api: &dyn ImageApi,
) -> Result<RemoteImageSyncReport, SyncError> {
    debug!("[REMOTE] Entering remote image synchronisation");
    let mut report = RemoteImageSyncReport::default();
    let pending = images.list_images_pending_upload()?;

    let unknown: BTreeSet<String> = pending
        .iter()
        .filter(|i| !i.is_uploaded())
        .map(|i| i.checksum.clone())
        .collect();
    let unknown: Vec<String> = unknown.into_iter().collect();

    for batch in unknown.chunks(EXISTENCE_BATCH_SIZE) {
        debug!(size = batch.len(), "[REMOTE] Querying existing images");
        let existing = api.images_exist(batch).await.map_err(|e| {
            error!(error = %e, "[REMOTE] Existence query failed");
            SyncError::Remote(e)
        })?;
        for checksum in batch {
            let Some(&remote_id) = existing.get(checksum) else {
                continue;
            };
            if remote_id <= 0 {
                continue;
            }
            let updated = images.set_remote_id_and_clear_upload(checksum, remote_id)?;
            debug!(%checksum, remote_id, updated, "[REMOTE] Image already on the gallery");
            report.found_remote += updated;
        }
    }

    for mut image in pending.into_iter().filter(|i| i.is_uploaded()) {
        match api.check_file(image.remote_id, &image.checksum).await {
            Ok(RemoteFileState::Equal) => {
                debug!(path = %image.full_path.display(), remote_id = image.remote_id, "[REMOTE] Remote file is identical");
                image.upload_required = false;
                images.save_image(&image)?;
                report.unchanged_remote += 1;
            }
            Ok(RemoteFileState::Different) => {}
            Err(e) => {
                warn!(path = %image.full_path.display(), remote_id = image.remote_id, error = %e, "[REMOTE] Could not check remote file, skipping");
                report.check_failures += 1;
            }
        }
    }

    info!(
        found_remote = report.found_remote,
        unchanged_remote = report.unchanged_remote,
        check_failures = report.check_failures,
        "[REMOTE] Remote image synchronisation complete"
    );
    Ok(report)
}
