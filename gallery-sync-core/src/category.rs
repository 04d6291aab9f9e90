//! # category: album reconciliation
//!
//! Brings the cached categories in line with the gallery and the local tree, then creates every
//! missing album on the gallery.
//!
//! Three steps, in order:
//! 1. Upsert the remote category list into the cache by remote id, applying name/parent drift.
//! 2. Insert a pending record (`remote_id == 0`) for every snapshot directory without one.
//! 3. Create the pending categories sorted by key, so a parent always has its remote id before
//!    any of its children are sent. Creation is sequential for that reason.
//!
//! A parent that cannot be resolved aborts the whole batch: the key structure is corrupt and
//! retrying the remaining children could only attach them to the wrong album.

use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::contract::{CategoryApi, CategoryStore, RemoteCategory};
use crate::error::SyncError;
use crate::model::CategoryRecord;
use crate::scan::Snapshot;

/// Counts of what a category pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CategorySyncReport {
    /// Cache records inserted or updated from the remote listing.
    pub updated_from_remote: usize,
    /// Local directories seen for the first time.
    pub discovered: usize,
    /// Albums created on the gallery.
    pub created: usize,
}

pub async fn synchronize_categories(
    snapshot: &Snapshot,
    store: &dyn CategoryStore,
    api: &dyn CategoryApi,
) -> Result<CategorySyncReport, SyncError> {
    debug!("[CATEGORIES] Entering category synchronisation");
    let mut report = CategorySyncReport::default();

    let remote = api.list_categories().await.map_err(|e| {
        error!(error = %e, "[CATEGORIES] Could not list remote categories");
        SyncError::Remote(e)
    })?;
    info!(count = remote.len(), "[CATEGORIES] Remote categories listed");
    for category in &remote {
        if upsert_remote_category(store, category)? {
            report.updated_from_remote += 1;
        }
    }

    for node in snapshot.values().filter(|n| n.is_dir) {
        if store.get_category_by_key(&node.key)?.is_some() {
            continue;
        }
        debug!(key = %node.key, "[CATEGORIES] New local directory");
        store.save_category(&CategoryRecord::pending(&node.key, &node.name))?;
        report.discovered += 1;
    }

    report.created = create_pending_categories(store, api).await?;

    info!(
        updated_from_remote = report.updated_from_remote,
        discovered = report.discovered,
        created = report.created,
        "[CATEGORIES] Category synchronisation complete"
    );
    Ok(report)
}

/// Writes one remote category into the cache. Returns whether anything was written.
fn upsert_remote_category(
    store: &dyn CategoryStore,
    remote: &RemoteCategory,
) -> Result<bool, SyncError> {
    let existing = match store.get_category_by_remote_id(remote.id)? {
        Some(cached) => Some(cached),
        // A locally discovered album that was created remotely but never recorded.
        None => store.get_category_by_key(&remote.key)?,
    };

    let record = match existing {
        Some(cached)
            if cached.remote_id == remote.id
                && cached.remote_parent_id == remote.parent_id
                && cached.name == remote.name
                && cached.key == remote.key =>
        {
            return Ok(false);
        }
        Some(cached) => {
            debug!(cached = %cached, remote_key = %remote.key, "[CATEGORIES] Applying remote drift");
            CategoryRecord {
                local_id: cached.local_id,
                remote_id: remote.id,
                remote_parent_id: remote.parent_id,
                name: remote.name.clone(),
                key: remote.key.clone(),
            }
        }
        None => CategoryRecord {
            local_id: 0,
            remote_id: remote.id,
            remote_parent_id: remote.parent_id,
            name: remote.name.clone(),
            key: remote.key.clone(),
        },
    };

    match store.save_category(&record) {
        Ok(()) => Ok(true),
        Err(e) if e.is_duplicate() => {
            warn!(key = %record.key, remote_id = record.remote_id, "[CATEGORIES] Remote category collides with a cached key, skipping");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn create_pending_categories(
    store: &dyn CategoryStore,
    api: &dyn CategoryApi,
) -> Result<usize, SyncError> {
    let mut pending = store.list_categories_pending_creation()?;
    pending.sort_by(|a, b| a.key.cmp(&b.key));
    if pending.is_empty() {
        return Ok(0);
    }
    info!(count = pending.len(), "[CATEGORIES] Creating categories on the gallery");

    // Remote ids assigned during this pass, by key.
    let mut created: HashMap<String, i64> = HashMap::new();

    for mut category in pending {
        if category.key.is_empty() || category.name.is_empty() {
            return Err(SyncError::InvalidCategoryKey {
                local_id: category.local_id,
                key: category.key,
            });
        }

        let parent_id = match category.parent_key() {
            None => 0,
            Some(parent_key) => resolve_parent(store, &created, &category.key, parent_key)?,
        };

        let remote_id = api
            .create_category(parent_id, &category.name)
            .await
            .map_err(|e| {
                error!(key = %category.key, parent_id, error = %e, "[CATEGORIES] Could not create category");
                SyncError::Remote(e)
            })?;
        info!(key = %category.key, remote_id, parent_id, "[CATEGORIES] Category created");

        category.remote_id = remote_id;
        category.remote_parent_id = parent_id;
        store.save_category(&category)?;
        created.insert(category.key, remote_id);
    }

    Ok(created.len())
}

fn resolve_parent(
    store: &dyn CategoryStore,
    created: &HashMap<String, i64>,
    key: &str,
    parent_key: &str,
) -> Result<i64, SyncError> {
    if let Some(&id) = created.get(parent_key) {
        return Ok(id);
    }
    match store.get_category_by_key(parent_key)? {
        Some(parent) if parent.is_created() => Ok(parent.remote_id),
        Some(_) => {
            error!(key, parent_key, "[CATEGORIES] Parent category has no remote id");
            Err(SyncError::ParentNotCreated {
                key: key.to_string(),
                parent_key: parent_key.to_string(),
            })
        }
        None => {
            error!(key, parent_key, "[CATEGORIES] Parent category is unknown");
            Err(SyncError::MissingParentCategory {
                key: key.to_string(),
                parent_key: parent_key.to_string(),
            })
        }
    }
}
