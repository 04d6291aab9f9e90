use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_CACHE_PATH: &str = "./localstate.db";
pub const DEFAULT_PARALLEL_UPLOADS: usize = 4;
pub const DEFAULT_EXTENSIONS: [&str; 2] = ["jpg", "png"];
/// Upload chunk size used when the gallery does not advertise a usable one.
pub const DEFAULT_CHUNK_SIZE_KB: usize = 512;
/// Upper bound on the advertised chunk size; one chunk is held in memory per upload worker.
pub const MAX_CHUNK_SIZE_KB: usize = 64 * 1024;

/// Immutable configuration of one synchronisation run.
///
/// Built once at startup and passed by reference into every stage.
#[derive(Debug, Clone, Serialize)]
pub struct SyncConfig {
    pub root_path: PathBuf,
    pub cache_path: PathBuf,
    pub gallery_url: String,
    pub gallery_user: String,
    #[serde(skip_serializing)]
    pub gallery_password: String,
    /// Prepare metadata only, never transfer files.
    pub no_upload: bool,
    /// Actually delete images that vanished from disk.
    pub remove_images: bool,
    pub parallel_uploads: usize,
    pub checksum_workers: usize,
    /// Lowercase file extensions without the leading dot.
    pub extensions: Vec<String>,
    /// Directory names pruned from the scan, with their whole subtree.
    pub ignore_dirs: Vec<String>,
}

impl SyncConfig {
    pub fn new(
        root_path: impl Into<PathBuf>,
        gallery_url: impl Into<String>,
        gallery_user: impl Into<String>,
        gallery_password: impl Into<String>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            gallery_url: gallery_url.into(),
            gallery_user: gallery_user.into(),
            gallery_password: gallery_password.into(),
            no_upload: false,
            remove_images: false,
            parallel_uploads: DEFAULT_PARALLEL_UPLOADS,
            checksum_workers: default_checksum_workers(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ignore_dirs: Vec::new(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            root_path = %self.root_path.display(),
            cache_path = %self.cache_path.display(),
            gallery_url = %self.gallery_url,
            gallery_user = %self.gallery_user,
            parallel_uploads = self.parallel_uploads,
            no_upload = self.no_upload,
            remove_images = self.remove_images,
            "Loaded SyncConfig"
        );
        debug!(
            extensions = ?self.extensions,
            ignore_dirs = ?self.ignore_dirs,
            checksum_workers = self.checksum_workers,
            "SyncConfig scan settings"
        );
    }
}

/// One checksum worker per available processor core.
pub fn default_checksum_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
