//! Error types for the synchronisation engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::contract::ApiError;

/// Result type for change-cache operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the local change-cache.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique column (image path, category key, category remote id) already holds this value.
    #[error("{table} with key {key} already exists")]
    Duplicate { table: &'static str, key: String },

    /// An image record may never be pending upload and pending delete at once.
    #[error("image {} cannot be marked for upload and deletion at the same time", path.display())]
    ConflictingFlags { path: PathBuf },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Returns true when the error reports an already existing record.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

/// Errors that can occur while synchronising.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cache error: {0}")]
    Store(#[from] StoreError),

    #[error("remote gallery error: {0}")]
    Remote(ApiError),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan of {} failed: {message}", root.display())]
    Scan { root: PathBuf, message: String },

    /// A category without a usable key; the snapshot or cache is corrupt.
    #[error("category {local_id} has an invalid key {key:?}")]
    InvalidCategoryKey { local_id: i64, key: String },

    #[error("parent category {parent_key} of {key} is not in the cache")]
    MissingParentCategory { key: String, parent_key: String },

    #[error("parent category {parent_key} of {key} has not been created on the gallery")]
    ParentNotCreated { key: String, parent_key: String },

    #[error("worker task failed: {0}")]
    WorkerJoin(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Cache failures abort the running phase; everything else is a per-item problem
    /// when raised inside a worker.
    pub fn is_store(&self) -> bool {
        matches!(self, SyncError::Store(_))
    }
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        SyncError::Remote(e)
    }
}
