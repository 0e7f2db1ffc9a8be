//! Error types for the merge job.

use s2lu_raster::{Envelope, RasterError};
use thiserror::Error;

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Why an invocation failed.
///
/// Every variant is terminal for the invocation; retrying is up to whatever
/// delivered the notification.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The source or reference raster is unreachable or not a GeoTIFF.
    #[error("not found: {0}")]
    NotFound(String),

    /// Undecodable raster, missing georeferencing, unsupported CRS pair or an
    /// incomplete notification.
    #[error("format error: {0}")]
    Format(String),

    /// Source and reference rasters do not overlap.
    #[error("source extent {source_extent} does not overlap reference extent {reference_extent}")]
    GeometryMismatch {
        /// Source envelope in the source CRS.
        source_extent: Envelope,
        /// Reference envelope expressed in the source CRS.
        reference_extent: Envelope,
    },

    /// Output storage rejected the write.
    #[error("failed to write {key}: {source}")]
    Write {
        /// Storage key being written.
        key: String,
        /// Underlying storage error.
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    /// Short name of the variant, used as a metric label.
    pub const fn kind(&self) -> &'static str {
        match self {
            MergeError::NotFound(_) => "not_found",
            MergeError::Format(_) => "format",
            MergeError::GeometryMismatch { .. } => "geometry_mismatch",
            MergeError::Write { .. } => "write",
        }
    }
}

impl From<RasterError> for MergeError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::NotFound(_)
            | RasterError::UnrecognizedFormat(_)
            | RasterError::InvalidLocation(_)
            | RasterError::HttpRequest(_)
            | RasterError::DownloadFailed { .. } => MergeError::NotFound(err.to_string()),
            RasterError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                MergeError::NotFound(err.to_string())
            }
            other => MergeError::Format(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        MergeError::Format(format!("invalid notification: {}", err))
    }
}

/// Step of an invocation, reported with every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Decoding the notification payload.
    Parse,
    /// Resolving and reading the source raster.
    FetchSource,
    /// Reading (or reusing) the reference raster.
    LoadReference,
    /// Bringing both rasters onto the output grid.
    Align,
    /// Applying the pixel rule.
    Merge,
    /// Encoding and storing the output.
    Write,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::FetchSource => "fetch-source",
            Stage::LoadReference => "load-reference",
            Stage::Align => "align",
            Stage::Merge => "merge",
            Stage::Write => "write",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed invocation with enough context for alerting and retry policies.
#[derive(Debug, Error)]
#[error("{stage} failed for item {item_id}: {source}")]
pub struct InvocationError {
    /// STAC item id, or `"<unknown>"` when the payload could not be parsed.
    pub item_id: String,
    pub stage: Stage,
    #[source]
    pub source: MergeError,
}

impl InvocationError {
    pub fn new(item_id: impl Into<String>, stage: Stage, source: MergeError) -> Self {
        Self {
            item_id: item_id.into(),
            stage,
            source,
        }
    }
}
