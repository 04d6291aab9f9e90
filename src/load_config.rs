/// `load_config` module: builds the immutable [`SyncConfig`] of a run from its three sources.
///
/// Sources, lowest precedence first:
/// 1. an optional YAML file (`--config`),
/// 2. the process environment (`GALLERY_URL`, `GALLERY_USER`, `GALLERY_PASSWORD`, usually from `.env`),
/// 3. command-line flags.
///
/// Environment and flags both arrive through clap, so this module only sees two layers: the file
/// and the [`ConfigLayer`] built from the parsed arguments.
///
/// # Errors
/// All errors use `anyhow::Error` with context and surface at the CLI boundary as exit code 1.
/// Validation runs before any disk or network I/O beyond reading the config file itself.
use anyhow::{bail, Context, Result};
use gallery_sync_core::config::{
    default_checksum_workers, SyncConfig, DEFAULT_CACHE_PATH, DEFAULT_EXTENSIONS,
    DEFAULT_PARALLEL_UPLOADS,
};
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One partial source of configuration. Every field is optional; later layers win.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub root_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub gallery_url: Option<String>,
    pub gallery_user: Option<String>,
    pub gallery_password: Option<String>,
    pub no_upload: Option<bool>,
    pub remove_images: Option<bool>,
    pub parallel_uploads: Option<usize>,
    pub checksum_workers: Option<usize>,
    pub extensions: Option<Vec<String>>,
    pub ignore_dirs: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Overlays `other` on top of `self`.
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            root_path: other.root_path.or(self.root_path),
            cache_path: other.cache_path.or(self.cache_path),
            gallery_url: other.gallery_url.or(self.gallery_url),
            gallery_user: other.gallery_user.or(self.gallery_user),
            gallery_password: other.gallery_password.or(self.gallery_password),
            no_upload: other.no_upload.or(self.no_upload),
            remove_images: other.remove_images.or(self.remove_images),
            parallel_uploads: other.parallel_uploads.or(self.parallel_uploads),
            checksum_workers: other.checksum_workers.or(self.checksum_workers),
            extensions: other.extensions.or(self.extensions),
            ignore_dirs: other.ignore_dirs.or(self.ignore_dirs),
        }
    }
}

/// Reads a YAML config file into a [`ConfigLayer`].
pub fn read_config_file<P: AsRef<Path>>(path: P) -> Result<ConfigLayer> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    // An empty file is a valid, empty layer.
    if content.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }

    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })
}

/// Merges the optional file with the argument layer, applies defaults and validates the result.
pub fn load_config(config_file: Option<&Path>, overrides: ConfigLayer) -> Result<SyncConfig> {
    let base = match config_file {
        Some(path) => read_config_file(path)?,
        None => ConfigLayer::default(),
    };
    let config = build_config(base.merge(overrides))?;
    config.trace_loaded();
    Ok(config)
}

fn build_config(layer: ConfigLayer) -> Result<SyncConfig> {
    let root_path = layer.root_path.context("root path is required (--root-path)")?;
    let gallery_url = required(layer.gallery_url, "gallery url", "--gallery-url / GALLERY_URL")?;
    let gallery_user = required(layer.gallery_user, "gallery user", "--gallery-user / GALLERY_USER")?;
    let gallery_password = required(
        layer.gallery_password,
        "gallery password",
        "--gallery-password / GALLERY_PASSWORD",
    )?;

    validate_url(&gallery_url)?;

    let parallel_uploads = layer.parallel_uploads.unwrap_or(DEFAULT_PARALLEL_UPLOADS);
    if parallel_uploads < 1 {
        bail!("parallel uploads must be at least 1, got {parallel_uploads}");
    }
    let checksum_workers = match layer.checksum_workers {
        Some(0) => bail!("checksum workers must be at least 1"),
        Some(n) => n,
        None => default_checksum_workers(),
    };

    let extensions = match layer.extensions.map(normalise_extensions) {
        Some(list) if !list.is_empty() => list,
        _ => DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
    };

    Ok(SyncConfig {
        root_path,
        cache_path: layer
            .cache_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH)),
        gallery_url,
        gallery_user,
        gallery_password,
        no_upload: layer.no_upload.unwrap_or(false),
        remove_images: layer.remove_images.unwrap_or(false),
        parallel_uploads,
        checksum_workers,
        extensions,
        ignore_dirs: layer.ignore_dirs.unwrap_or_default(),
    })
}

fn required(value: Option<String>, what: &str, source: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{what} is required ({source})"),
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("gallery url {raw:?} is not a valid url"))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            warn!(gallery_url = %raw, "Gallery url is not https, credentials are sent unencrypted");
            Ok(())
        }
        other => bail!("gallery url must use http or https, got {other}"),
    }
}

/// Lowercases extensions and strips a leading dot, dropping empty entries.
fn normalise_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
