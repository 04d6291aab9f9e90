//! High-level pipeline: login → scan → categories → local metadata → remote metadata → delete → upload.
//!
//! [`synchronise`] runs one complete synchronisation against the collaborators bundled in a
//! [`SyncContext`]. Every stage reads and writes through the change-cache only; nothing is kept
//! in memory between runs.
//!
//! # Error Handling
//! A failing stage stops the run and is returned as a [`StageError`] naming the stage, so the
//! caller can map it to a process exit code with [`SyncStage::exit_code`]. Per-item failures
//! inside a stage are logged and counted in the report instead.
//!
//! # Ordering
//! Deletion runs before upload, and only when `remove_images` is set. With `no_upload` the
//! metadata is fully prepared but nothing is transferred; the report flags this as
//! `upload_skipped`.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::category::{synchronize_categories, CategorySyncReport};
use crate::config::{SyncConfig, DEFAULT_CHUNK_SIZE_KB, MAX_CHUNK_SIZE_KB};
use crate::contract::{
    CategoryApi, CategoryStore, ChecksumProvider, ImageApi, ImageStore, SessionApi, SessionInfo,
};
use crate::error::SyncError;
use crate::executor::{delete_images, upload_images, DeleteReport, UploadReport};
use crate::local_images::{synchronize_local_images, LocalImageSyncReport};
use crate::remote_images::{synchronize_remote_images, RemoteImageSyncReport};
use crate::scan::{scan_local_tree, Md5Checksum, Snapshot};

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Login,
    Scan,
    Categories,
    LocalMetadata,
    RemoteMetadata,
    Delete,
    Upload,
}

impl SyncStage {
    /// Process exit code reported when this stage fails.
    pub fn exit_code(self) -> i32 {
        match self {
            SyncStage::Login => 2,
            SyncStage::Scan => 3,
            SyncStage::Categories => 4,
            SyncStage::LocalMetadata => 5,
            SyncStage::RemoteMetadata => 6,
            SyncStage::Delete => 7,
            SyncStage::Upload => 8,
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Login => "login",
            SyncStage::Scan => "scan",
            SyncStage::Categories => "category synchronisation",
            SyncStage::LocalMetadata => "local image metadata synchronisation",
            SyncStage::RemoteMetadata => "remote image metadata synchronisation",
            SyncStage::Delete => "image deletion",
            SyncStage::Upload => "image upload",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: SyncStage,
    #[source]
    pub source: SyncError,
}

impl StageError {
    pub fn exit_code(&self) -> i32 {
        self.stage.exit_code()
    }
}

fn failed_at(stage: SyncStage) -> impl FnOnce(SyncError) -> StageError {
    move |source| {
        error!(%stage, error = %source, "[SYNC][ERROR] Stage failed");
        StageError { stage, source }
    }
}

/// Collaborators of one run.
#[derive(Clone)]
pub struct SyncContext {
    pub session: Arc<dyn SessionApi>,
    pub category_api: Arc<dyn CategoryApi>,
    pub image_api: Arc<dyn ImageApi>,
    pub category_store: Arc<dyn CategoryStore>,
    pub image_store: Arc<dyn ImageStore>,
    pub checksums: Arc<dyn ChecksumProvider>,
}

impl SyncContext {
    /// Wires a single gallery client and a single cache, hashing files with MD5.
    pub fn new<G, S>(gallery: Arc<G>, store: Arc<S>) -> Self
    where
        G: SessionApi + CategoryApi + ImageApi + 'static,
        S: CategoryStore + ImageStore + 'static,
    {
        Self {
            session: gallery.clone(),
            category_api: gallery.clone(),
            image_api: gallery,
            category_store: store.clone(),
            image_store: store,
            checksums: Arc::new(Md5Checksum),
        }
    }
}

/// What a run did, stage by stage.
#[derive(Debug, Default)]
pub struct SynchroniseReport {
    pub snapshot_nodes: usize,
    pub categories: CategorySyncReport,
    pub local: LocalImageSyncReport,
    pub remote: RemoteImageSyncReport,
    /// `None` when deletion is disabled.
    pub deleted: Option<DeleteReport>,
    /// `None` when uploads were skipped.
    pub uploaded: Option<UploadReport>,
    pub upload_skipped: bool,
}

pub async fn synchronise(
    config: &SyncConfig,
    ctx: &SyncContext,
) -> Result<SynchroniseReport, StageError> {
    info!("[SYNC] Starting synchronisation");

    let session = ctx.session.login().await.map_err(|e| failed_at(SyncStage::Login)(e.into()))?;
    let session = with_usable_chunk_size(session);
    info!(user = %session.username, chunk_size_kb = session.chunk_size_kb, "[SYNC] Logged in");

    let result = run_stages(config, ctx, session.chunk_size_bytes()).await;

    if let Err(e) = ctx.session.logout().await {
        warn!(error = %e, "[SYNC] Logout failed");
    }

    if let Ok(report) = &result {
        info!(
            categories_created = report.categories.created,
            images_updated = report.local.updated,
            uploaded = report.uploaded.as_ref().map(|u| u.uploaded).unwrap_or(0),
            upload_skipped = report.upload_skipped,
            "[SYNC] Synchronisation finished"
        );
    }
    result
}

/// Replaces a missing chunk size with the default and caps an oversized one.
fn with_usable_chunk_size(session: SessionInfo) -> SessionInfo {
    let chunk_size_kb = match session.chunk_size_kb {
        0 => {
            warn!(default_kb = DEFAULT_CHUNK_SIZE_KB, "[SYNC] Gallery reported no chunk size, using default");
            DEFAULT_CHUNK_SIZE_KB
        }
        kb if kb > MAX_CHUNK_SIZE_KB => {
            warn!(reported_kb = kb, max_kb = MAX_CHUNK_SIZE_KB, "[SYNC] Gallery chunk size too large, capping");
            MAX_CHUNK_SIZE_KB
        }
        kb => kb,
    };
    SessionInfo {
        chunk_size_kb,
        ..session
    }
}

async fn run_stages(
    config: &SyncConfig,
    ctx: &SyncContext,
    chunk_size: usize,
) -> Result<SynchroniseReport, StageError> {
    let mut report = SynchroniseReport::default();

    let snapshot = scan(config).await.map_err(failed_at(SyncStage::Scan))?;
    report.snapshot_nodes = snapshot.len();

    report.categories = synchronize_categories(
        &snapshot,
        ctx.category_store.as_ref(),
        ctx.category_api.as_ref(),
    )
    .await
    .map_err(failed_at(SyncStage::Categories))?;

    report.local = synchronize_local_images(
        &snapshot,
        Arc::clone(&ctx.category_store),
        Arc::clone(&ctx.image_store),
        Arc::clone(&ctx.checksums),
        config.checksum_workers,
    )
    .await
    .map_err(failed_at(SyncStage::LocalMetadata))?;

    report.remote = synchronize_remote_images(ctx.image_store.as_ref(), ctx.image_api.as_ref())
        .await
        .map_err(failed_at(SyncStage::RemoteMetadata))?;

    if config.remove_images {
        report.deleted = Some(
            delete_images(ctx.image_store.as_ref(), ctx.image_api.as_ref())
                .await
                .map_err(failed_at(SyncStage::Delete))?,
        );
    } else {
        info!("[SYNC] Image removal is disabled, skipping deletion");
    }

    if config.no_upload {
        warn!("[SYNC] Skipping upload of images as no-upload is set");
        report.upload_skipped = true;
        return Ok(report);
    }

    report.uploaded = Some(
        upload_images(
            Arc::clone(&ctx.image_store),
            Arc::clone(&ctx.image_api),
            chunk_size,
            config.parallel_uploads,
        )
        .await
        .map_err(failed_at(SyncStage::Upload))?,
    );
    Ok(report)
}

async fn scan(config: &SyncConfig) -> Result<Snapshot, SyncError> {
    let root = config.root_path.clone();
    let extensions = config.extensions.clone();
    let ignore_dirs = config.ignore_dirs.clone();
    debug!(root = %root.display(), "[SYNC] Scanning local tree");
    tokio::task::spawn_blocking(move || scan_local_tree(&root, &extensions, &ignore_dirs))
        .await
        .map_err(|e| SyncError::WorkerJoin(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_stage() {
        let stages = [
            SyncStage::Login,
            SyncStage::Scan,
            SyncStage::Categories,
            SyncStage::LocalMetadata,
            SyncStage::RemoteMetadata,
            SyncStage::Delete,
            SyncStage::Upload,
        ];
        let codes: Vec<i32> = stages.iter().map(|s| s.exit_code()).collect();
        assert_eq!(codes, vec![2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn chunk_size_falls_back_and_is_capped() {
        let session = |kb| SessionInfo {
            username: "tester".into(),
            chunk_size_kb: kb,
        };
        assert_eq!(with_usable_chunk_size(session(0)).chunk_size_bytes(), 512 * 1024);
        assert_eq!(with_usable_chunk_size(session(500)).chunk_size_bytes(), 500 * 1024);
        assert_eq!(
            with_usable_chunk_size(session(usize::MAX)).chunk_size_kb,
            MAX_CHUNK_SIZE_KB
        );
        assert_eq!(session(usize::MAX).chunk_size_bytes(), usize::MAX);
    }

    #[test]
    fn stage_error_names_its_stage() {
        let err = StageError {
            stage: SyncStage::Delete,
            source: SyncError::WorkerJoin("panicked".into()),
        };
        assert_eq!(err.exit_code(), 7);
        assert_eq!(err.to_string(), "image deletion failed: worker task failed: panicked");
    }
}
