///
/// This module implements the CLI interface for gallery-sync: command parsing, argument
/// exposure, the async entrypoint and exit-code mapping.
///
/// All synchronisation logic (reconcilers, change-cache, worker pool) lives in the
/// [`gallery-sync-core`] crate. This module wires the HTTP gallery client and the SQLite cache
/// into a [`SyncContext`] and runs the pipeline once.
///
/// ## Exit codes
/// | code | meaning |
/// |---|---|
/// | 0 | synchronisation complete |
/// | 1 | configuration or startup failure |
/// | 2..8 | failing pipeline stage, one code per stage |
/// | 90 | dry run complete (`--no-upload`) |
///
/// [`gallery-sync-core`]: ../../gallery-sync-core/
use crate::gallery::GalleryClient;
use crate::load_config::{load_config, ConfigLayer};
use clap::{Args, Parser, Subcommand};
use gallery_sync_core::datastore::SqliteStore;
use gallery_sync_core::synchronise::{synchronise, SyncContext};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_DRY_RUN: i32 = 90;

/// CLI for gallery-sync: mirror a local image tree onto a Piwigo-compatible gallery.
#[derive(Parser, Debug)]
#[clap(
    name = "gallery-sync",
    version,
    about = "Mirror a local directory tree of images onto a Piwigo-compatible gallery"
)]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[clap(
        long,
        global = true,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub log_level: String,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronise the local tree with the gallery
    Sync(SyncArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct SyncArgs {
    /// Optional YAML config file; flags and environment override its values
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Root of the local image tree
    #[clap(long)]
    pub root_path: Option<PathBuf>,

    /// Location of the change-cache database [default: ./localstate.db]
    #[clap(long)]
    pub cache_path: Option<PathBuf>,

    /// Base url of the gallery
    #[clap(long, env = "GALLERY_URL")]
    pub gallery_url: Option<String>,

    #[clap(long, env = "GALLERY_USER")]
    pub gallery_user: Option<String>,

    #[clap(long, env = "GALLERY_PASSWORD", hide_env_values = true)]
    pub gallery_password: Option<String>,

    /// Prepare all metadata but do not upload any file
    #[clap(long)]
    pub no_upload: bool,

    /// Delete gallery images whose local file is gone
    #[clap(long)]
    pub remove_images: bool,

    /// Number of concurrent uploads [default: 4]
    #[clap(long)]
    pub parallel_uploads: Option<usize>,

    /// Number of concurrent checksum workers [default: processor cores]
    #[clap(long)]
    pub checksum_workers: Option<usize>,

    /// File extension to include, repeatable [default: jpg, png]
    #[clap(long = "extension")]
    pub extensions: Vec<String>,

    /// Directory name to skip with its subtree, repeatable
    #[clap(long = "ignore-dir")]
    pub ignore_dirs: Vec<String>,
}

impl SyncArgs {
    /// The flag and environment layer; unset switches and empty lists leave the file value alone.
    pub fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            root_path: self.root_path.clone(),
            cache_path: self.cache_path.clone(),
            gallery_url: self.gallery_url.clone(),
            gallery_user: self.gallery_user.clone(),
            gallery_password: self.gallery_password.clone(),
            no_upload: self.no_upload.then_some(true),
            remove_images: self.remove_images.then_some(true),
            parallel_uploads: self.parallel_uploads,
            checksum_workers: self.checksum_workers,
            extensions: (!self.extensions.is_empty()).then(|| self.extensions.clone()),
            ignore_dirs: (!self.ignore_dirs.is_empty()).then(|| self.ignore_dirs.clone()),
        }
    }
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Metadata prepared, uploads skipped.
    DryRun,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Completed => 0,
            Outcome::DryRun => EXIT_DRY_RUN,
        }
    }
}

#[derive(Error, Debug)]
#[error("{source:#}")]
pub struct CliError {
    pub code: i32,
    #[source]
    pub source: anyhow::Error,
}

impl CliError {
    fn config(source: anyhow::Error) -> Self {
        Self {
            code: EXIT_CONFIG,
            source,
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<Outcome, CliError> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Sync(args) => sync(args).await,
    };

    match &result {
        Ok(outcome) => tracing::info!(command = "sync", ?outcome, "Synchronisation complete"),
        Err(e) => tracing::error!(command = "sync", code = e.code, error = %e, "Synchronisation failed"),
    }

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!(
            code = result.as_ref().map(|o| o.exit_code()).unwrap_or_else(|e| e.code),
            "exit"
        );
    });

    result
}

async fn sync(args: SyncArgs) -> Result<Outcome, CliError> {
    let config = load_config(args.config.as_deref(), args.to_layer()).map_err(CliError::config)?;
    tracing::info!(command = "sync", "Starting synchronisation process");

    let gallery = GalleryClient::new(
        &config.gallery_url,
        &config.gallery_user,
        &config.gallery_password,
    )
    .map_err(|e| CliError::config(e.into()))?;
    let store = SqliteStore::open(config.cache_path.clone()).map_err(|e| {
        CliError::config(anyhow::Error::new(e).context(format!(
            "failed to open change-cache {}",
            config.cache_path.display()
        )))
    })?;

    let ctx = SyncContext::new(Arc::new(gallery), Arc::new(store));
    match synchronise(&config, &ctx).await {
        Ok(report) => {
            tracing::debug!(?report, "Synchronisation report");
            if report.upload_skipped {
                Ok(Outcome::DryRun)
            } else {
                Ok(Outcome::Completed)
            }
        }
        Err(e) => Err(CliError {
            code: e.exit_code(),
            source: e.into(),
        }),
    }
}
