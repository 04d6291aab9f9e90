//! # executor: uploads and deletions against the gallery
//!
//! [`upload_images`] drains the upload queue on a bounded worker pool. Each image is sent with
//! the chunked protocol: base64 chunks at sequential positions, then one finalising call. A
//! failed image is logged and left queued for the next run; the others carry on.
//!
//! [`delete_images`] removes every delete-marked image from the gallery in one call and only
//! purges the cache once that call has succeeded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::contract::{ImageApi, ImageStore, NewImage};
use crate::error::SyncError;
use crate::model::ImageRecord;
use crate::worker_pool::run_pool;

/// Result of uploading a single image.
#[derive(Debug)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub result: Result<i64, SyncError>,
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// Per-image outcomes, in completion order.
    pub outcomes: Vec<UploadOutcome>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteReport {
    /// Remote ids sent in the delete call.
    pub remote_deleted: usize,
    /// Cache records purged afterwards.
    pub purged: usize,
}

pub async fn upload_images(
    images: Arc<dyn ImageStore>,
    api: Arc<dyn ImageApi>,
    chunk_size: usize,
    workers: usize,
) -> Result<UploadReport, SyncError> {
    let pending = images.list_images_pending_upload()?;
    if pending.is_empty() {
        info!("[UPLOAD] Nothing to upload");
        return Ok(UploadReport::default());
    }
    info!(count = pending.len(), workers, chunk_size, "[UPLOAD] Uploading images");

    let outcomes = run_pool(workers, pending, move |image: ImageRecord| {
        let images = Arc::clone(&images);
        let api = Arc::clone(&api);
        async move {
            let path = image.full_path.clone();
            let result = upload_image(image, images.as_ref(), api.as_ref(), chunk_size).await;
            UploadOutcome { path, result }
        }
    })
    .await?;

    let mut report = UploadReport::default();
    for outcome in outcomes {
        match &outcome.result {
            Ok(remote_id) => {
                info!(path = %outcome.path.display(), remote_id, "[UPLOAD] Image uploaded");
                report.uploaded += 1;
            }
            Err(e) => {
                warn!(path = %outcome.path.display(), error = %e, "[UPLOAD] Upload failed, image stays queued");
                report.failed += 1;
            }
        }
        report.outcomes.push(outcome);
    }

    let store_failure = report
        .outcomes
        .iter()
        .position(|o| matches!(&o.result, Err(e) if e.is_store()));
    if let Some(index) = store_failure {
        let failed = report.outcomes.swap_remove(index);
        error!(path = %failed.path.display(), "[UPLOAD] Could not record an upload in the cache");
        if let Err(e) = failed.result {
            return Err(e);
        }
    }

    info!(uploaded = report.uploaded, failed = report.failed, "[UPLOAD] Upload complete");
    Ok(report)
}

async fn upload_image(
    mut image: ImageRecord,
    images: &dyn ImageStore,
    api: &dyn ImageApi,
    chunk_size: usize,
) -> Result<i64, SyncError> {
    let chunks = send_chunks(&image.full_path, &image.checksum, chunk_size, api).await?;
    debug!(path = %image.full_path.display(), chunks, "[UPLOAD] Chunks sent, finalising");

    let remote_id = api
        .add_image(NewImage {
            checksum: image.checksum.clone(),
            filename: image.filename.clone(),
            category_id: image.category_remote_id,
            image_id: image.is_uploaded().then_some(image.remote_id),
        })
        .await?;

    if remote_id > 0 {
        image.remote_id = remote_id;
    } else if !image.is_uploaded() {
        // Without an id the image could never be revised or deleted; keep it queued.
        return Err(SyncError::Remote(
            format!("gallery returned no id for {}", image.filename).into(),
        ));
    }
    image.upload_required = false;
    images.save_image(&image)?;
    Ok(image.remote_id)
}

/// Streams the file to the gallery. Returns the number of chunks sent.
async fn send_chunks(
    path: &Path,
    checksum: &str,
    chunk_size: usize,
    api: &dyn ImageApi,
) -> Result<u64, SyncError> {
    let mut file = File::open(path).await.map_err(|e| SyncError::io(path, e))?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut position = 0u64;

    loop {
        let n = read_chunk(&mut file, &mut buf)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        api.add_chunk(checksum, position, STANDARD.encode(&buf[..n]))
            .await?;
        position += 1;
        if n < buf.len() {
            break;
        }
    }
    Ok(position)
}

/// Fills `buf` unless the file ends first. Returns the number of bytes read.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub async fn delete_images(
    images: &dyn ImageStore,
    api: &dyn ImageApi,
) -> Result<DeleteReport, SyncError> {
    let pending = images.list_images_pending_delete()?;
    if pending.is_empty() {
        info!("[DELETE] Nothing to delete");
        return Ok(DeleteReport::default());
    }

    let mut remote_ids: Vec<i64> = pending
        .iter()
        .filter(|i| i.is_uploaded())
        .map(|i| i.remote_id)
        .collect();
    remote_ids.sort_unstable();
    remote_ids.dedup();

    if !remote_ids.is_empty() {
        info!(count = remote_ids.len(), "[DELETE] Deleting images on the gallery");
        api.delete_images(&remote_ids).await.map_err(|e| {
            error!(error = %e, "[DELETE] Remote delete failed, keeping records for the next run");
            SyncError::Remote(e)
        })?;
    }

    let purged = images.purge_deleted_images()?;
    info!(remote_deleted = remote_ids.len(), purged, "[DELETE] Deletion complete");
    Ok(DeleteReport {
        remote_deleted: remote_ids.len(),
        purged,
    })
}
