//! # s2lu-runner
//!
//! The `s2lu` command: handles one imagery notification per run, and offers
//! a couple of helpers for looking at notifications and rasters.
//!
//! ```text
//! s2lu [--config s2lu.yaml] [--json-logs] handle --event event.json
//! s2lu scene-id --event -
//! s2lu inspect s3://bucket/landuse.tif
//! ```
//!
//! Exit codes: `0` on success, `1` when the invocation failed, `2` for
//! usage or configuration errors.

pub mod logging;

use clap::{Args, Parser, Subcommand};
use s2lu_merge::{
    ConfigError, InvocationError, LocalStore, MergeConfig, MergeError, MergeJob, OutputLocation,
    RuleConfig, SourceScene,
};
use s2lu_raster::{RasterError, RasterFetcher, RasterLocation};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info};

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "s2lu")]
#[command(version, about = "Merge Sentinel-2 scene classification with a land-use raster")]
pub struct Cli {
    /// YAML settings file; S2LU_* environment variables override it
    #[arg(long, global = true, value_name = "YAML")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Handle one notification and write the derived raster
    Handle {
        /// Notification file, or `-` for stdin
        #[arg(long, value_name = "FILE")]
        event: String,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the scene id and output keys a notification maps to
    SceneId {
        /// Notification file, or `-` for stdin
        #[arg(long, value_name = "FILE")]
        event: String,

        /// Output key prefix
        #[arg(long)]
        output_prefix: Option<String>,
    },
    /// Print size, georeferencing and no-data of a raster
    Inspect {
        /// Local path, http(s) URL or s3:// URL
        location: String,
    },
}

/// Settings that take precedence over the config file and environment.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Reference land-use raster
    #[arg(long)]
    pub reference: Option<String>,

    /// Directory output keys are written under
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    /// Output key prefix
    #[arg(long)]
    pub output_prefix: Option<String>,

    /// Pixel rule: mask or urban-cover
    #[arg(long)]
    pub rule: Option<RuleConfig>,

    /// Skip the JSON summary sidecar
    #[arg(long)]
    pub no_summary: bool,

    /// Keep pixels outside the scene footprint
    #[arg(long)]
    pub no_clip: bool,
}

impl Overrides {
    pub fn apply(self, config: &mut MergeConfig) {
        if let Some(reference) = self.reference {
            config.reference = reference;
        }
        if let Some(root) = self.output_root {
            config.output_root = root;
        }
        if let Some(prefix) = self.output_prefix {
            config.output_prefix = prefix;
        }
        if let Some(rule) = self.rule {
            config.rule = rule;
        }
        if self.no_summary {
            config.write_summary = false;
        }
        if self.no_clip {
            config.clip_to_footprint = false;
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a command failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read event from {source_name}: {source}")]
    ReadEvent {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up merge job: {0}")]
    Setup(#[source] MergeError),

    #[error("invalid notification: {0}")]
    Notification(#[source] MergeError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Invocation(_) | RunError::Notification(_) | RunError::Raster(_) => 1,
            RunError::Config(_) | RunError::ReadEvent { .. } | RunError::Setup(_) => 2,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Parse arguments, set up logging and run the selected command.
pub fn main_with(cli: Cli) -> ExitCode {
    logging::init(cli.json_logs);
    s2lu_merge::telemetry::describe_metrics();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match &err {
                RunError::Invocation(failure) => error!(
                    item_id = %failure.item_id,
                    stage = %failure.stage,
                    kind = failure.source.kind(),
                    error = %failure.source,
                    "invocation failed"
                ),
                other => error!(error = %other, "command failed"),
            }
            eprintln!("error: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

pub fn run(cli: Cli) -> Result<(), RunError> {
    match cli.command {
        Command::Handle { event, overrides } => {
            let mut config = MergeConfig::load(cli.config.as_deref())?;
            overrides.apply(&mut config);
            let output = handle(config, &event)?;
            println!("{}", output.raster_key);
            if let Some(summary) = &output.summary_key {
                println!("{}", summary);
            }
        }
        Command::SceneId {
            event,
            output_prefix,
        } => {
            let mut config = MergeConfig::load(cli.config.as_deref())?;
            if let Some(prefix) = output_prefix {
                config.output_prefix = prefix;
            }
            let report = scene_id(&config, &event)?;
            println!("{}", report);
        }
        Command::Inspect { location } => {
            let report = inspect(&location)?;
            println!("{}", report);
        }
    }
    Ok(())
}

/// Handle the notification in `event` with `config`.
pub fn handle(config: MergeConfig, event: &str) -> Result<OutputLocation, RunError> {
    config.validate()?;
    let payload = read_event(event)?;

    let store = Box::new(LocalStore::new(&config.output_root));
    let job = MergeJob::new(config, store).map_err(RunError::Setup)?;
    let rule = job.config().rule.build();
    info!(
        reference = %job.config().reference,
        rule = rule.name(),
        output_root = %job.config().output_root.display(),
        "merge job ready"
    );

    Ok(job.handle_event(&payload)?)
}

/// Scene id, source asset and output keys of the notification in `event`.
pub fn scene_id(config: &MergeConfig, event: &str) -> Result<serde_json::Value, RunError> {
    let payload = read_event(event)?;
    let scene = SourceScene::from_json(&payload).map_err(RunError::Notification)?;
    let output = OutputLocation::new(&config.output_prefix, scene.scene_id, config.write_summary);

    Ok(json!({
        "item_id": scene.item_id,
        "scene_id": output.scene_id.to_string(),
        "source": scene.source_href,
        "raster_key": output.raster_key,
        "summary_key": output.summary_key,
    }))
}

/// Size, georeferencing and no-data of the raster at `location`.
pub fn inspect(location: &str) -> Result<serde_json::Value, RunError> {
    let location = RasterLocation::parse(location)?;
    let raster = RasterFetcher::new()?.fetch(&location)?;
    let (res_x, res_y) = raster.resolution();

    Ok(json!({
        "location": location.to_string(),
        "width": raster.width(),
        "height": raster.height(),
        "epsg": raster.epsg(),
        "no_data": raster.no_data(),
        "envelope": raster.envelope().to_array(),
        "resolution": [res_x, res_y],
    }))
}

fn read_event(event: &str) -> Result<String, RunError> {
    if event == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .map_err(|source| RunError::ReadEvent {
                source_name: "stdin".into(),
                source,
            })?;
        return Ok(payload);
    }

    std::fs::read_to_string(Path::new(event)).map_err(|source| RunError::ReadEvent {
        source_name: event.to_string(),
        source,
    })
}
