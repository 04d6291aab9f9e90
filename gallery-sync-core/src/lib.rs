#![doc = "gallery-sync-core: synchronisation engine for gallery-sync."]

//! This crate contains the reconciliation logic that mirrors a local directory tree of images
//! onto a remote gallery: the persisted change-cache, the category, local-image and remote-image
//! reconcilers, and the upload/delete executor.
//! No network transport lives here; the CLI crate provides the HTTP gallery client.
//!
//! # Usage
//! Build a [`config::SyncConfig`], wire the collaborators into a [`synchronise::SyncContext`]
//! and call [`synchronise::synchronise`].

pub mod category;
pub mod config;
pub mod contract;
pub mod datastore;
pub mod error;
pub mod executor;
pub mod local_images;
pub mod model;
pub mod remote_images;
pub mod scan;
pub mod synchronise;
pub mod worker_pool;
