//! # contract: capability interfaces between the engine and its collaborators
//!
//! Every stage of the pipeline reaches the change-cache and the remote gallery exclusively
//! through the traits in this module:
//!
//! - [`CategoryStore`] / [`ImageStore`]: the persisted change-cache (see [`crate::datastore`]).
//! - [`SessionApi`], [`CategoryApi`], [`ImageApi`]: the remote gallery service.
//! - [`ChecksumProvider`]: content hashing of local files.
//!
//! ## Mocking & Testing
//! - All traits are annotated for `mockall` so tests can substitute deterministic collaborators.
//!   The mocks are exported behind the default `test-export-mocks` feature for downstream crates.
//!
//! ## Errors
//! - Store methods return the typed [`StoreError`]; callers rely on its `Duplicate` variant.
//! - Remote methods return a boxed [`ApiError`]; transports convert their own errors at the boundary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::StoreResult;
use crate::model::{CategoryRecord, ImageRecord};

/// Error type for remote gallery calls (simple boxed error).
pub type ApiError = Box<dyn std::error::Error + Send + Sync>;

/// Session details obtained once at login and reused for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub username: String,
    /// Upload chunk size in KiB as advertised by the gallery.
    pub chunk_size_kb: usize,
}

impl SessionInfo {
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_kb.saturating_mul(1024)
    }
}

/// A category as listed by the gallery, with its hierarchical key already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCategory {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub key: String,
}

/// Result of comparing a local checksum with the file stored for a remote image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileState {
    /// The gallery holds exactly this content.
    Equal,
    Different,
}

/// Final call of the chunked upload protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub checksum: String,
    pub filename: String,
    pub category_id: i64,
    /// Set when the image already exists remotely; the gallery then stores a new revision.
    pub image_id: Option<i64>,
}

/// Persisted categories.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait CategoryStore: Send + Sync {
    fn get_category_by_key(&self, key: &str) -> StoreResult<Option<CategoryRecord>>;

    fn get_category_by_remote_id(&self, remote_id: i64) -> StoreResult<Option<CategoryRecord>>;

    /// Inserts the record when `local_id` is 0, updates it otherwise.
    fn save_category(&self, category: &CategoryRecord) -> StoreResult<()>;

    /// Categories with `remote_id == 0`, ordered by key so parents precede children.
    fn list_categories_pending_creation(&self) -> StoreResult<Vec<CategoryRecord>>;
}

/// Persisted image metadata.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ImageStore: Send + Sync {
    fn get_image_by_path(&self, path: &Path) -> StoreResult<Option<ImageRecord>>;

    fn list_all_images(&self) -> StoreResult<Vec<ImageRecord>>;

    /// Records with `upload_required` set and `delete_required` cleared, ordered by path.
    fn list_images_pending_upload(&self) -> StoreResult<Vec<ImageRecord>>;

    fn list_images_pending_delete(&self) -> StoreResult<Vec<ImageRecord>>;

    /// Inserts the record when `local_id` is 0, updates it otherwise.
    fn save_image(&self, image: &ImageRecord) -> StoreResult<()>;

    /// Stores the remote id for every live record with this checksum and clears their upload flag.
    /// Returns the number of records touched.
    fn set_remote_id_and_clear_upload(&self, checksum: &str, remote_id: i64) -> StoreResult<usize>;

    /// Removes every record flagged for deletion. Returns the number of removed records.
    fn purge_deleted_images(&self) -> StoreResult<usize>;
}

/// Content hashing of local files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ChecksumProvider: Send + Sync {
    fn checksum(&self, path: &Path) -> std::io::Result<String>;
}

/// Session handling on the gallery.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Logs in and returns the session details used for the rest of the run.
    async fn login(&self) -> Result<SessionInfo, ApiError>;

    async fn logout(&self) -> Result<(), ApiError>;
}

/// Album operations on the gallery.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CategoryApi: Send + Sync {
    /// Lists every category, recursively.
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, ApiError>;

    /// Creates a category below `parent_id` (0 for a root category) and returns its id.
    async fn create_category(&self, parent_id: i64, name: &str) -> Result<i64, ApiError>;
}

/// Image operations on the gallery.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ImageApi: Send + Sync {
    /// Looks up checksums on the gallery. Missing images map to 0.
    async fn images_exist(&self, checksums: &[String]) -> Result<HashMap<String, i64>, ApiError>;

    async fn check_file(&self, remote_id: i64, checksum: &str) -> Result<RemoteFileState, ApiError>;

    /// Transmits one base64 encoded chunk of the file identified by `checksum`.
    async fn add_chunk(&self, checksum: &str, position: u64, data: String) -> Result<(), ApiError>;

    /// Finalises an upload once all chunks are sent. Returns the image id.
    async fn add_image(&self, image: NewImage) -> Result<i64, ApiError>;

    /// Deletes a batch of images in one call.
    async fn delete_images(&self, remote_ids: &[i64]) -> Result<(), ApiError>;
}
