//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur when reading, writing or fetching rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Unsupported sample layout in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// The raster does not exist at the given location.
    #[error("Raster not found: {0}")]
    NotFound(String),

    /// The location does not point at a GeoTIFF.
    #[error("Not a recognized raster format: {0}")]
    UnrecognizedFormat(String),

    /// The location string could not be parsed.
    #[error("Invalid raster location: {0}")]
    InvalidLocation(String),

    /// Pixel buffer length does not match the raster dimensions.
    #[error("Raster size mismatch: {width}x{height} needs {expected} samples, got {actual}")]
    SizeMismatch {
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
        /// Number of samples required.
        expected: usize,
        /// Number of samples supplied.
        actual: usize,
    },

    /// The EPSG code is not one this crate can convert coordinates for.
    #[error("Unsupported coordinate reference system EPSG:{0}")]
    UnsupportedCrs(u32),

    /// Reference cache lock was poisoned (a thread panicked while holding the lock).
    #[error("Reference cache lock was poisoned")]
    CacheLockPoisoned,

    /// HTTP request error when fetching a raster.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Remote server answered with a non-success status.
    #[error("Failed to download {url}: {reason}")]
    DownloadFailed {
        /// Requested URL.
        url: String,
        /// Reason for failure.
        reason: String,
    },
}
