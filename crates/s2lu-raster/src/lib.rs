//! # s2lu-raster
//!
//! Single-band GeoTIFF rasters for the s2lu merge job.
//!
//! This crate provides:
//! - [`GeoRaster`]: a single-band raster with its affine [`GeoTransform`],
//!   EPSG code and no-data value, decoded from GeoTIFF with the `tiff` crate
//! - [`encode_geotiff`]: deterministic GeoTIFF encoding
//! - [`Crs`] / [`CoordTransform`]: WGS84 and UTM coordinate conversion
//! - [`RasterLocation`] / [`RasterFetcher`]: reading rasters from local paths,
//!   HTTP(S) URLs and public S3 buckets
//! - [`ReferenceCache`]: the lazily loaded, shared reference raster
//!
//! ## Example
//!
//! ```no_run
//! use s2lu_raster::{RasterFetcher, RasterLocation, ReferenceCache};
//!
//! let fetcher = RasterFetcher::new()?;
//! let scl = fetcher.fetch(&RasterLocation::parse(
//!     "s3://sentinel-cogs/sentinel-s2-l2a-cogs/30/T/XM/2021/1/S2B_30TXM_20210103_0_L2A/SCL.tif",
//! )?)?;
//! println!("SCL envelope: {}", scl.envelope());
//!
//! // The reference raster is loaded once and shared afterwards
//! let reference = ReferenceCache::new(RasterLocation::parse("/data/landuse.tif")?);
//! let landuse = reference.get_or_load(&fetcher)?;
//! println!("Land use: {}x{}", landuse.width(), landuse.height());
//! # Ok::<(), s2lu_raster::RasterError>(())
//! ```

mod cache;
mod crs;
mod error;
mod fetch;
mod geotransform;
mod raster;
mod writer;

pub use cache::ReferenceCache;
pub use crs::{CoordTransform, Crs, EPSG_WGS84};
pub use error::RasterError;
pub use fetch::{DownloadStats, RasterFetcher, RasterLocation};
pub use geotransform::{Envelope, GeoTransform, Window};
pub use raster::GeoRaster;
pub use writer::{encode_geotiff, write_geotiff, SampleFormat};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
