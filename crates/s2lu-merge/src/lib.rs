//! # s2lu-merge
//!
//! Merges Sentinel-2 scene classification (SCL) rasters with a static
//! land-use reference raster, one notification at a time.
//!
//! An invocation:
//!
//! 1. parses the notification into a [`SourceScene`] (raw STAC item or SNS
//!    envelope)
//! 2. fetches the scene's SCL raster
//! 3. loads the reference raster through the job's [`ReferenceCache`]
//! 4. aligns the reference onto the source grid ([`Alignment`])
//! 5. applies a [`PixelRule`] to every overlapping pixel, clipped to the
//!    scene footprint
//! 6. stores `{prefix}/{scene_id}.tif` and the `{prefix}/{scene_id}.json`
//!    summary sidecar through an [`ObjectStore`]
//!
//! ## Example
//!
//! ```no_run
//! use s2lu_merge::{LocalStore, MergeConfig, MergeJob};
//!
//! let config = MergeConfig::from_env()?;
//! config.validate()?;
//! let store = Box::new(LocalStore::new(&config.output_root));
//! let job = MergeJob::new(config, store)?;
//!
//! let payload = std::fs::read_to_string("event.json")?;
//! match job.handle_event(&payload) {
//!     Ok(output) => println!("wrote {}", output),
//!     Err(err) => eprintln!("{} failed: {}", err.stage, err.source),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`ReferenceCache`]: s2lu_raster::ReferenceCache

mod align;
mod config;
mod error;
mod footprint;
mod handler;
mod merge;
mod notification;
mod output;
mod rule;
mod store;
mod summary;
pub mod telemetry;

pub use align::Alignment;
pub use config::{
    ConfigError, MergeConfig, ENV_CLIP_TO_FOOTPRINT, ENV_DEFAULT_EPSG, ENV_DOWNLOAD_DIR,
    ENV_OUTPUT_PREFIX, ENV_OUTPUT_ROOT, ENV_REFERENCE, ENV_RULE, ENV_WRITE_SUMMARY,
};
pub use error::{InvocationError, MergeError, Result, Stage};
pub use footprint::Footprint;
pub use handler::MergeJob;
pub use merge::{clip_footprint, merge, merge_aligned, Merged};
pub use notification::{MgrsTile, SceneId, SourceScene};
pub use output::{output_key, OutputLocation, RASTER_EXTENSION, SUMMARY_EXTENSION};
pub use rule::{
    CoverStats, MaskRule, PixelRule, RuleConfig, UrbanCoverRule, DEFAULT_MASK_CLEAR,
    DEFAULT_SCL_CLEAR, DEFAULT_URBAN_CLASSES, NODATA_SENTINEL,
};
pub use store::{LocalStore, MemoryStore, ObjectStore};
pub use summary::MergeSummary;
