//! # datastore: the persisted change-cache
//!
//! SQLite backed implementation of [`CategoryStore`] and [`ImageStore`].
//!
//! Every operation opens its own connection, and every mutating operation runs inside a single
//! transaction that is committed on success and rolled back on failure, so no partial write is
//! ever observable. A process-wide gate allows only one open connection at a time, which
//! serialises all cache access no matter how many workers call into the store.
//!
//! The store needs a file path: an in-memory database would not survive between operations.

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, trace};

use crate::contract::{CategoryStore, ImageStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{CategoryRecord, ImageRecord};

const IMAGE_COLUMNS: &str = "imageId, remoteId, fullPath, fileName, checksum, lastChanged, \
     categoryPath, categoryRemoteId, uploadRequired, deleteRequired";

const CATEGORY_COLUMNS: &str = "categoryId, remoteId, remoteParentId, name, key";

pub struct SqliteStore {
    path: PathBuf,
    gate: Mutex<()>,
}

impl SqliteStore {
    /// Opens the cache at `path`, creating the file and schema when needed.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self {
            path: path.into(),
            gate: Mutex::new(()),
        };
        store.with_transaction(|tx| {
            create_tables(tx)?;
            Ok(())
        })?;
        debug!(path = %store.path.display(), "Change-cache initialised");
        Ok(store)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        // The guard protects no data, a poisoned gate is still usable.
        let _guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let conn = Connection::open(&self.path)?;
        f(&conn)
    }

    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let mut conn = Connection::open(&self.path)?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                error!(error = %e, "Rolling back change-cache transaction");
                if let Err(rollback_err) = tx.rollback() {
                    error!(error = %rollback_err, "Rollback of change-cache transaction failed");
                }
                Err(e)
            }
        }
    }
}

fn create_tables(tx: &Transaction<'_>) -> StoreResult<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS image (
            imageId          INTEGER PRIMARY KEY,
            remoteId         INTEGER NOT NULL DEFAULT 0,
            fullPath         TEXT NOT NULL,
            fileName         TEXT NOT NULL,
            checksum         TEXT NOT NULL,
            lastChanged      TEXT NOT NULL,
            categoryPath     TEXT NOT NULL,
            categoryRemoteId INTEGER NOT NULL DEFAULT 0,
            uploadRequired   INTEGER NOT NULL,
            deleteRequired   INTEGER NOT NULL,
            CHECK (NOT (uploadRequired = 1 AND deleteRequired = 1))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS UX_Image_FullPath ON image (fullPath);
        CREATE INDEX IF NOT EXISTS IX_Image_Checksum ON image (checksum);

        CREATE TABLE IF NOT EXISTS category (
            categoryId     INTEGER PRIMARY KEY,
            remoteId       INTEGER NOT NULL DEFAULT 0,
            remoteParentId INTEGER NOT NULL DEFAULT 0,
            name           TEXT NOT NULL,
            key            TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS UX_Category_Key ON category (key);
        CREATE UNIQUE INDEX IF NOT EXISTS UX_Category_RemoteId ON category (remoteId) WHERE remoteId > 0;",
    )?;
    Ok(())
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Turns unique constraint violations into [`StoreError::Duplicate`].
fn classify(err: rusqlite::Error, table: &'static str, key: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
        {
            StoreError::Duplicate {
                table,
                key: key.to_string(),
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

fn read_image(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    let full_path: String = row.get(2)?;
    Ok(ImageRecord {
        local_id: row.get(0)?,
        remote_id: row.get(1)?,
        full_path: PathBuf::from(full_path),
        filename: row.get(3)?,
        checksum: row.get(4)?,
        last_change: row.get(5)?,
        category_key: row.get(6)?,
        category_remote_id: row.get(7)?,
        upload_required: row.get(8)?,
        delete_required: row.get(9)?,
    })
}

fn read_category(row: &Row<'_>) -> rusqlite::Result<CategoryRecord> {
    Ok(CategoryRecord {
        local_id: row.get(0)?,
        remote_id: row.get(1)?,
        remote_parent_id: row.get(2)?,
        name: row.get(3)?,
        key: row.get(4)?,
    })
}

fn query_images(conn: &Connection, filter: &str) -> StoreResult<Vec<ImageRecord>> {
    let sql = format!("SELECT {IMAGE_COLUMNS} FROM image {filter}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], read_image)?;

    let mut images = Vec::new();
    for image in rows {
        images.push(image?);
    }
    Ok(images)
}

impl CategoryStore for SqliteStore {
    fn get_category_by_key(&self, key: &str) -> StoreResult<Option<CategoryRecord>> {
        trace!(key, "Query category by key");
        self.with_connection(|conn| {
            let sql = format!("SELECT {CATEGORY_COLUMNS} FROM category WHERE key = ?1");
            Ok(conn.query_row(&sql, [key], read_category).optional()?)
        })
    }

    fn get_category_by_remote_id(&self, remote_id: i64) -> StoreResult<Option<CategoryRecord>> {
        trace!(remote_id, "Query category by remote id");
        self.with_connection(|conn| {
            let sql = format!("SELECT {CATEGORY_COLUMNS} FROM category WHERE remoteId = ?1");
            Ok(conn.query_row(&sql, [remote_id], read_category).optional()?)
        })
    }

    fn save_category(&self, category: &CategoryRecord) -> StoreResult<()> {
        trace!(%category, "Saving category");
        self.with_transaction(|tx| {
            let result = if category.local_id <= 0 {
                tx.execute(
                    "INSERT INTO category (remoteId, remoteParentId, name, key) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        category.remote_id,
                        category.remote_parent_id,
                        category.name,
                        category.key
                    ],
                )
            } else {
                tx.execute(
                    "UPDATE category SET remoteId = ?1, remoteParentId = ?2, name = ?3, key = ?4 WHERE categoryId = ?5",
                    params![
                        category.remote_id,
                        category.remote_parent_id,
                        category.name,
                        category.key,
                        category.local_id
                    ],
                )
            };
            result.map_err(|e| classify(e, "category", &category.key))?;
            Ok(())
        })
    }

    fn list_categories_pending_creation(&self) -> StoreResult<Vec<CategoryRecord>> {
        trace!("Query categories to create on the gallery");
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {CATEGORY_COLUMNS} FROM category WHERE remoteId = 0 ORDER BY key ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], read_category)?;

            let mut categories = Vec::new();
            for category in rows {
                categories.push(category?);
            }
            Ok(categories)
        })
    }
}

impl ImageStore for SqliteStore {
    fn get_image_by_path(&self, path: &Path) -> StoreResult<Option<ImageRecord>> {
        trace!(path = %path.display(), "Query image metadata");
        self.with_connection(|conn| {
            let sql = format!("SELECT {IMAGE_COLUMNS} FROM image WHERE fullPath = ?1");
            Ok(conn
                .query_row(&sql, [path_text(path)], read_image)
                .optional()?)
        })
    }

    fn list_all_images(&self) -> StoreResult<Vec<ImageRecord>> {
        trace!("Query all image metadata");
        self.with_connection(|conn| query_images(conn, ""))
    }

    fn list_images_pending_upload(&self) -> StoreResult<Vec<ImageRecord>> {
        trace!("Query image metadata queued for upload");
        self.with_connection(|conn| {
            query_images(
                conn,
                "WHERE uploadRequired = 1 AND deleteRequired = 0 ORDER BY fullPath ASC",
            )
        })
    }

    fn list_images_pending_delete(&self) -> StoreResult<Vec<ImageRecord>> {
        trace!("Query image metadata queued for deletion");
        self.with_connection(|conn| query_images(conn, "WHERE deleteRequired = 1"))
    }

    fn save_image(&self, image: &ImageRecord) -> StoreResult<()> {
        if image.upload_required && image.delete_required {
            return Err(StoreError::ConflictingFlags {
                path: image.full_path.clone(),
            });
        }

        trace!(%image, "Saving image metadata");
        let full_path = path_text(&image.full_path);
        self.with_transaction(|tx| {
            let result = if image.local_id <= 0 {
                tx.execute(
                    "INSERT INTO image (remoteId, fullPath, fileName, checksum, lastChanged, categoryPath, \
                     categoryRemoteId, uploadRequired, deleteRequired) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        image.remote_id,
                        full_path,
                        image.filename,
                        image.checksum,
                        image.last_change,
                        image.category_key,
                        image.category_remote_id,
                        image.upload_required,
                        image.delete_required
                    ],
                )
            } else {
                tx.execute(
                    "UPDATE image SET remoteId = ?1, fullPath = ?2, fileName = ?3, checksum = ?4, lastChanged = ?5, \
                     categoryPath = ?6, categoryRemoteId = ?7, uploadRequired = ?8, deleteRequired = ?9 \
                     WHERE imageId = ?10",
                    params![
                        image.remote_id,
                        full_path,
                        image.filename,
                        image.checksum,
                        image.last_change,
                        image.category_key,
                        image.category_remote_id,
                        image.upload_required,
                        image.delete_required,
                        image.local_id
                    ],
                )
            };
            result.map_err(|e| classify(e, "image", &full_path))?;
            Ok(())
        })
    }

    fn set_remote_id_and_clear_upload(&self, checksum: &str, remote_id: i64) -> StoreResult<usize> {
        trace!(checksum, remote_id, "Saving remote id for checksum");
        self.with_transaction(|tx| {
            let updated = tx.execute(
                "UPDATE image SET remoteId = ?1, uploadRequired = CASE WHEN ?1 > 0 THEN 0 ELSE 1 END \
                 WHERE checksum = ?2 AND deleteRequired = 0",
                params![remote_id, checksum],
            )?;
            Ok(updated)
        })
    }

    fn purge_deleted_images(&self) -> StoreResult<usize> {
        trace!("Deleting marked image records");
        self.with_transaction(|tx| {
            let purged = tx.execute("DELETE FROM image WHERE deleteRequired = 1", [])?;
            Ok(purged)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("cache.db")).unwrap();
        (dir, store)
    }

    fn image(path: &str, checksum: &str) -> ImageRecord {
        ImageRecord {
            local_id: 0,
            remote_id: 0,
            full_path: PathBuf::from(path),
            filename: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            checksum: checksum.to_string(),
            last_change: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            category_key: "2024".to_string(),
            category_remote_id: 7,
            upload_required: true,
            delete_required: false,
        }
    }

    #[test]
    fn image_round_trips_through_the_cache() {
        let (_dir, store) = open_store();
        let mut img = image("/photos/2024/a.jpg", "aaa");
        img.last_change = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        store.save_image(&img).unwrap();

        let loaded = store
            .get_image_by_path(Path::new("/photos/2024/a.jpg"))
            .unwrap()
            .expect("image should be cached");
        assert!(loaded.local_id > 0);
        assert_eq!(loaded.last_change, img.last_change);
        assert_eq!(loaded.checksum, "aaa");
        assert!(loaded.upload_required);

        assert!(store
            .get_image_by_path(Path::new("/photos/2024/missing.jpg"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_image_path_is_reported_as_duplicate() {
        let (_dir, store) = open_store();
        store.save_image(&image("/photos/a.jpg", "aaa")).unwrap();
        let err = store.save_image(&image("/photos/a.jpg", "bbb")).unwrap_err();
        assert!(err.is_duplicate(), "unexpected error: {err:?}");
    }

    #[test]
    fn conflicting_flags_are_rejected_without_a_write() {
        let (_dir, store) = open_store();
        let mut img = image("/photos/a.jpg", "aaa");
        img.delete_required = true;
        let err = store.save_image(&img).unwrap_err();
        assert!(matches!(err, StoreError::ConflictingFlags { .. }));
        assert!(store.list_all_images().unwrap().is_empty());
    }

    #[test]
    fn pending_upload_excludes_delete_marked_records() {
        let (_dir, store) = open_store();
        store.save_image(&image("/photos/b.jpg", "bbb")).unwrap();
        let mut gone = image("/photos/a.jpg", "aaa");
        gone.mark_for_deletion();
        store.save_image(&gone).unwrap();

        let pending: Vec<_> = store
            .list_images_pending_upload()
            .unwrap()
            .into_iter()
            .map(|i| i.checksum)
            .collect();
        assert_eq!(pending, vec!["bbb".to_string()]);
        assert_eq!(store.list_images_pending_delete().unwrap().len(), 1);
    }

    #[test]
    fn set_remote_id_clears_upload_for_every_matching_checksum() {
        let (_dir, store) = open_store();
        store.save_image(&image("/photos/a.jpg", "same")).unwrap();
        store.save_image(&image("/photos/copy/a.jpg", "same")).unwrap();
        store.save_image(&image("/photos/b.jpg", "other")).unwrap();

        assert_eq!(store.set_remote_id_and_clear_upload("same", 42).unwrap(), 2);

        let pending = store.list_images_pending_upload().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].checksum, "other");
        let cached = store
            .get_image_by_path(Path::new("/photos/copy/a.jpg"))
            .unwrap()
            .unwrap();
        assert_eq!(cached.remote_id, 42);
    }

    #[test]
    fn purge_only_removes_delete_marked_records() {
        let (_dir, store) = open_store();
        store.save_image(&image("/photos/keep.jpg", "keep")).unwrap();
        let mut gone = image("/photos/gone.jpg", "gone");
        gone.mark_for_deletion();
        store.save_image(&gone).unwrap();

        assert_eq!(store.purge_deleted_images().unwrap(), 1);
        let remaining = store.list_all_images().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].checksum, "keep");
    }

    #[test]
    fn pending_categories_are_ordered_by_key() {
        let (_dir, store) = open_store();
        for (key, name) in [("2024/trip/day1", "day1"), ("2024", "2024"), ("2024/trip", "trip")] {
            store
                .save_category(&CategoryRecord::pending(key, name))
                .unwrap();
        }

        let keys: Vec<_> = store
            .list_categories_pending_creation()
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, vec!["2024", "2024/trip", "2024/trip/day1"]);
    }

    #[test]
    fn category_keys_are_unique_but_pending_remote_ids_are_not() {
        let (_dir, store) = open_store();
        store.save_category(&CategoryRecord::pending("a", "a")).unwrap();
        store.save_category(&CategoryRecord::pending("b", "b")).unwrap();

        let err = store
            .save_category(&CategoryRecord::pending("a", "a"))
            .unwrap_err();
        assert!(err.is_duplicate());

        let mut a = store.get_category_by_key("a").unwrap().unwrap();
        a.remote_id = 10;
        store.save_category(&a).unwrap();
        assert_eq!(store.get_category_by_remote_id(10).unwrap().unwrap().key, "a");

        let mut b = store.get_category_by_key("b").unwrap().unwrap();
        b.remote_id = 10;
        assert!(store.save_category(&b).unwrap_err().is_duplicate());
    }

    #[test]
    fn cache_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        SqliteStore::open(&path)
            .unwrap()
            .save_image(&image("/photos/a.jpg", "aaa"))
            .unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_all_images().unwrap().len(), 1);
    }
}
