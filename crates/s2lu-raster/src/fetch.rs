//! Raster locations and fetching.
//!
//! A location is either a local GeoTIFF or a remote object reachable over
//! HTTP(S). The forms accepted are the ones that show up in imagery
//! notifications and deployment settings:
//!
//! - plain paths and `file://` URLs
//! - `http://` and `https://` URLs
//! - `s3://bucket/key`, read through the bucket's public HTTPS endpoint
//! - GDAL virtual paths `/vsicurl/<url>` and `/vsis3/bucket/key`
//!
//! Only `.tif` / `.tiff` objects are accepted.

use crate::{GeoRaster, RasterError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Timeout for a single raster download.
const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Where a raster lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RasterLocation {
    /// A file on the local filesystem.
    Local(PathBuf),
    /// An object fetched with an HTTP GET.
    Remote(String),
}

impl RasterLocation {
    /// Parse a location string.
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(RasterError::InvalidLocation("empty location".into()));
        }

        let parsed = if let Some(rest) = location.strip_prefix("/vsicurl/") {
            Self::parse(rest)?
        } else if let Some(rest) = location.strip_prefix("/vsis3/") {
            Self::from_s3(rest, location)?
        } else if let Some(rest) = location.strip_prefix("s3://") {
            Self::from_s3(rest, location)?
        } else if location.starts_with("http://") || location.starts_with("https://") {
            RasterLocation::Remote(location.to_string())
        } else if let Some(rest) = location.strip_prefix("file://") {
            RasterLocation::Local(PathBuf::from(rest))
        } else {
            RasterLocation::Local(PathBuf::from(location))
        };

        if !parsed.has_raster_extension() {
            return Err(RasterError::UnrecognizedFormat(location.to_string()));
        }
        Ok(parsed)
    }

    fn from_s3(bucket_and_key: &str, original: &str) -> Result<Self> {
        let normalized = bucket_and_key.replace('\\', "/");
        let (bucket, key) = normalized
            .split_once('/')
            .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
            .ok_or_else(|| RasterError::InvalidLocation(original.to_string()))?;
        Ok(RasterLocation::Remote(format!(
            "https://{}.s3.amazonaws.com/{}",
            bucket, key
        )))
    }

    fn has_raster_extension(&self) -> bool {
        let name = match self {
            RasterLocation::Local(path) => path.to_string_lossy().into_owned(),
            RasterLocation::Remote(url) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        let name = name.to_ascii_lowercase();
        name.ends_with(".tif") || name.ends_with(".tiff")
    }

    /// File name of the cached copy of a remote raster.
    fn cache_file_name(url: &str) -> String {
        let path = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url)
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        path.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    }
}

impl std::fmt::Display for RasterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RasterLocation::Local(path) => write!(f, "{}", path.display()),
            RasterLocation::Remote(url) => f.write_str(url),
        }
    }
}

/// Download statistics for the fetcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadStats {
    /// Number of rasters downloaded this session.
    pub rasters_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
}

/// Reads rasters from local files or over HTTP.
///
/// Remote rasters can optionally be kept in a download directory; objects are
/// treated as immutable, so a cached copy is reused without revalidation.
pub struct RasterFetcher {
    client: reqwest::blocking::Client,
    /// Directory for downloaded copies of remote rasters.
    download_dir: Option<PathBuf>,
    rasters_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    next_temp: AtomicU64,
}

impl std::fmt::Debug for RasterFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterFetcher")
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

impl RasterFetcher {
    /// Create a fetcher that keeps nothing on disk.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            download_dir: None,
            rasters_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            next_temp: AtomicU64::new(0),
        })
    }

    /// Create a fetcher that keeps downloaded rasters in `dir`.
    pub fn with_download_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut fetcher = Self::new()?;
        fetcher.download_dir = Some(dir);
        Ok(fetcher)
    }

    pub fn download_dir(&self) -> Option<&Path> {
        self.download_dir.as_deref()
    }

    /// Get download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            rasters_downloaded: self.rasters_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Fetch and decode a raster.
    pub fn fetch(&self, location: &RasterLocation) -> Result<GeoRaster> {
        match location {
            RasterLocation::Local(path) => {
                if !path.is_file() {
                    return Err(RasterError::NotFound(path.display().to_string()));
                }
                GeoRaster::from_file(path)
            }
            RasterLocation::Remote(url) => {
                let bytes = self.fetch_remote(url)?;
                GeoRaster::from_bytes(&bytes)
            }
        }
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let cache_path = self
            .download_dir
            .as_ref()
            .map(|dir| dir.join(RasterLocation::cache_file_name(url)));

        if let Some(path) = cache_path.as_ref().filter(|p| p.is_file()) {
            debug!(url, path = %path.display(), "using downloaded copy");
            return Ok(fs::read(path)?);
        }

        debug!(url, "downloading raster");
        let response = self.client.get(url).send()?;
        let status = response.status();

        // S3 answers 403 for missing keys when listing is not allowed
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RasterError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(RasterError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let bytes = response.bytes()?.to_vec();
        self.rasters_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        if let Some(path) = cache_path {
            // Write-then-rename so a concurrent reader never sees a partial copy
            let tmp = self.temp_path(&path);
            let result = fs::File::create(&tmp)
                .and_then(|mut file| file.write_all(&bytes))
                .and_then(|()| fs::rename(&tmp, &path));
            if result.is_err() {
                let _ = fs::remove_file(&tmp);
            }
            result?;
        }

        Ok(bytes)
    }

    /// Temporary sibling of `path`, unique per process and per download.
    fn temp_path(&self, path: &Path) -> PathBuf {
        path.with_extension(format!(
            "part-{}-{}",
            std::process::id(),
            self.next_temp.fetch_add(1, Ordering::Relaxed)
        ))
    }
}
