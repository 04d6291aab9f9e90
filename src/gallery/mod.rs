//! # Gallery client
//!
//! [`GalleryClient`] talks to the gallery web service (`{base}/ws.php?format=json`) and
//! implements [`SessionApi`], [`CategoryApi`] and [`ImageApi`] for the synchronisation engine.
//!
//! - Every call is a form POST carrying a `method` field; responses are JSON envelopes.
//! - The session lives in a cookie store, so [`SessionApi::login`] must run before anything else.
//! - Transport and protocol failures are [`GalleryError`]s, boxed at the trait boundary.

pub mod responses;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use gallery_sync_core::contract::{
    ApiError, CategoryApi, ImageApi, NewImage, RemoteCategory, RemoteFileState, SessionApi,
    SessionInfo,
};
use gallery_sync_core::model::KEY_SEPARATOR;

use responses::{
    AddedImage, CategoryEntry, CategoryList, CreatedCategory, Envelope, ExistingImages, FileCheck,
    SessionStatus,
};

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid gallery url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} returned HTTP {status}")]
    HttpStatus { method: &'static str, status: u16 },

    #[error("could not decode {method} response: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{method} failed with status {status} ({code:?}): {message}")]
    Status {
        method: &'static str,
        status: String,
        code: Option<i64>,
        message: String,
    },

    #[error("{method} returned no result")]
    MissingResult { method: &'static str },

    #[error("the gallery did not provide a session token")]
    MissingToken,
}

pub struct GalleryClient {
    http: reqwest::Client,
    endpoint: Url,
    username: String,
    password: String,
}

impl GalleryClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, GalleryError> {
        let endpoint = endpoint_for(base_url)?;
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        debug!(endpoint = %endpoint, username, "Gallery client constructed");
        Ok(Self {
            http,
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Posts one web-service call and unwraps its envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        fields: &[(&str, String)],
    ) -> Result<Option<T>, GalleryError> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(fields.len() + 1);
        form.push(("method", method));
        form.extend(fields.iter().map(|(k, v)| (*k, v.as_str())));

        trace!(method, "Calling gallery");
        let response = self.http.post(self.endpoint.clone()).form(&form).send().await?;
        let http_status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !http_status.is_success() => {
                return Err(GalleryError::HttpStatus {
                    method,
                    status: http_status.as_u16(),
                })
            }
            Err(source) => return Err(GalleryError::Decode { method, source }),
        };

        if !envelope.is_ok() {
            let err = GalleryError::Status {
                method,
                status: envelope.stat,
                code: envelope.err,
                message: envelope.message.unwrap_or_default(),
            };
            error!(error = %err, "Gallery call failed");
            return Err(err);
        }
        Ok(envelope.result)
    }

    async fn call_for<T: DeserializeOwned>(
        &self,
        method: &'static str,
        fields: &[(&str, String)],
    ) -> Result<T, GalleryError> {
        self.call(method, fields)
            .await?
            .ok_or(GalleryError::MissingResult { method })
    }

    async fn status(&self) -> Result<SessionStatus, GalleryError> {
        self.call_for("pwg.session.getStatus", &[]).await
    }
}

/// `{base}/ws.php?format=json` for a gallery base url.
pub fn endpoint_for(base_url: &str) -> Result<Url, GalleryError> {
    let invalid = |reason: String| GalleryError::InvalidUrl {
        url: base_url.to_string(),
        reason,
    };
    let base = Url::parse(base_url.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", base.scheme())));
    }
    let mut endpoint = Url::parse(&format!("{}/ws.php", base.as_str().trim_end_matches('/')))
        .map_err(|e| invalid(e.to_string()))?;
    endpoint.set_query(Some("format=json"));
    Ok(endpoint)
}

/// Resolves the hierarchical key of every listed category by walking its parent chain.
///
/// A parent missing from the listing ends the chain, as does a cycle.
pub fn build_category_keys(entries: &[CategoryEntry]) -> Vec<RemoteCategory> {
    let by_id: HashMap<i64, &CategoryEntry> = entries.iter().map(|e| (e.id, e)).collect();

    let mut categories: Vec<RemoteCategory> = entries
        .iter()
        .map(|entry| {
            let mut names = vec![entry.name.as_str()];
            let mut parent = entry.id_uppercat;
            while let Some(parent_entry) = parent.and_then(|id| by_id.get(&id)) {
                if names.len() > entries.len() {
                    warn!(id = entry.id, "Category parent chain loops, truncating key");
                    break;
                }
                names.push(parent_entry.name.as_str());
                parent = parent_entry.id_uppercat;
            }
            names.reverse();
            RemoteCategory {
                id: entry.id,
                parent_id: entry.id_uppercat.unwrap_or(0),
                name: entry.name.clone(),
                key: names.join(&KEY_SEPARATOR.to_string()),
            }
        })
        .collect();
    categories.sort_by(|a, b| a.key.cmp(&b.key));
    categories
}

#[async_trait]
impl SessionApi for GalleryClient {
    async fn login(&self) -> Result<SessionInfo, ApiError> {
        info!(endpoint = %self.endpoint, username = %self.username, "Logging in to gallery");
        self.call::<serde_json::Value>(
            "pwg.session.login",
            &[
                ("username", self.username.clone()),
                ("password", self.password.clone()),
            ],
        )
        .await?;

        let status = self.status().await?;
        let chunk_size_kb = status
            .upload_form_chunk_size
            .filter(|kb| *kb > 0)
            .map(|kb| kb as usize)
            .unwrap_or(0);
        debug!(chunk_size_kb, "Upload chunk size from gallery");
        let username = if status.username.is_empty() {
            self.username.clone()
        } else {
            status.username
        };
        Ok(SessionInfo {
            username,
            chunk_size_kb,
        })
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.call::<serde_json::Value>("pwg.session.logout", &[])
            .await?;
        info!(endpoint = %self.endpoint, "Logged out from gallery");
        Ok(())
    }
}

#[async_trait]
impl CategoryApi for GalleryClient {
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, ApiError> {
        let list: CategoryList = self
            .call_for("pwg.categories.getList", &[("recursive", "true".to_string())])
            .await?;
        debug!(count = list.categories.len(), "Loaded gallery categories");
        Ok(build_category_keys(&list.categories))
    }

    async fn create_category(&self, parent_id: i64, name: &str) -> Result<i64, ApiError> {
        let mut fields = vec![("name", name.to_string())];
        if parent_id > 0 {
            fields.push(("parent", parent_id.to_string()));
        }
        let created: CreatedCategory = self.call_for("pwg.categories.add", &fields).await?;
        Ok(created.id)
    }
}

#[async_trait]
impl ImageApi for GalleryClient {
    async fn images_exist(&self, checksums: &[String]) -> Result<HashMap<String, i64>, ApiError> {
        let existing: ExistingImages = self
            .call_for("pwg.images.exist", &[("md5sum_list", checksums.join("|"))])
            .await?;
        Ok(existing
            .into_iter()
            .map(|(checksum, id)| {
                let id = id.and_then(|raw| raw.value()).unwrap_or(0);
                (checksum, id)
            })
            .collect())
    }

    async fn check_file(&self, remote_id: i64, checksum: &str) -> Result<RemoteFileState, ApiError> {
        let check: FileCheck = self
            .call_for(
                "pwg.images.checkFiles",
                &[
                    ("image_id", remote_id.to_string()),
                    ("file_sum", checksum.to_string()),
                ],
            )
            .await?;
        Ok(match check.get("file").map(String::as_str) {
            Some("equals") => RemoteFileState::Equal,
            _ => RemoteFileState::Different,
        })
    }

    async fn add_chunk(&self, checksum: &str, position: u64, data: String) -> Result<(), ApiError> {
        self.call::<serde_json::Value>(
            "pwg.images.addChunk",
            &[
                ("data", data),
                ("original_sum", checksum.to_string()),
                ("type", "file".to_string()),
                ("position", position.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn add_image(&self, image: NewImage) -> Result<i64, ApiError> {
        let mut fields = vec![
            ("original_sum", image.checksum),
            ("original_filename", image.filename.clone()),
            ("name", image.filename),
            ("categories", image.category_id.to_string()),
        ];
        if let Some(id) = image.image_id.filter(|id| *id > 0) {
            fields.push(("image_id", id.to_string()));
        }
        let added: AddedImage = self.call_for("pwg.images.add", &fields).await?;
        Ok(added.image_id)
    }

    async fn delete_images(&self, remote_ids: &[i64]) -> Result<(), ApiError> {
        let status = self.status().await?;
        if status.pwg_token.is_empty() {
            return Err(GalleryError::MissingToken.into());
        }
        let ids = remote_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("|");
        info!(ids = %ids, "Deleting images on gallery");
        self.call::<serde_json::Value>(
            "pwg.images.delete",
            &[("image_id", ids), ("pwg_token", status.pwg_token)],
        )
        .await?;
        Ok(())
    }
}
