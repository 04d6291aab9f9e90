//! Wire types of the gallery web service.
//!
//! Every response is an envelope `{"stat": "ok"|"fail", "err": n, "message": "...", "result": ...}`.
//! Ids are not typed consistently by the service (numbers, numeric strings, empty strings or
//! null depending on the method), so they are decoded leniently.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub stat: String,
    pub err: Option<i64>,
    pub message: Option<String>,
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_ok(&self) -> bool {
        self.stat == "ok"
    }
}

/// An id as sent by the service: a number or a numeric string.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    /// The id as a number; empty or non-numeric text yields `None`.
    pub fn value(&self) -> Option<i64> {
        match self {
            RawId::Number(n) => Some(*n),
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RawId::deserialize(deserializer)?;
    raw.value()
        .ok_or_else(|| de::Error::custom(format!("invalid id {raw:?}")))
}

fn lenient_optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.and_then(|raw| raw.value()))
}

/// Result of `pwg.session.getStatus`.
#[derive(Debug, Deserialize)]
pub struct SessionStatus {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub pwg_token: String,
    /// KiB.
    #[serde(default, deserialize_with = "lenient_optional_id")]
    pub upload_form_chunk_size: Option<i64>,
}

/// Result of `pwg.categories.getList`.
#[derive(Debug, Deserialize)]
pub struct CategoryList {
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CategoryEntry {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    pub name: String,
    /// `None` for root categories.
    #[serde(default, deserialize_with = "lenient_optional_id")]
    pub id_uppercat: Option<i64>,
}

/// Result of `pwg.categories.add`.
#[derive(Debug, Deserialize)]
pub struct CreatedCategory {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
}

/// Result of `pwg.images.add`.
#[derive(Debug, Deserialize)]
pub struct AddedImage {
    #[serde(deserialize_with = "lenient_id")]
    pub image_id: i64,
}

/// Result of `pwg.images.exist`: checksum to id, `null` when unknown.
pub type ExistingImages = HashMap<String, Option<RawId>>;

/// Result of `pwg.images.checkFiles`.
pub type FileCheck = HashMap<String, String>;
