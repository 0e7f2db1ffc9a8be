//! Lazily loaded, shared reference raster.

use crate::{GeoRaster, RasterError, RasterFetcher, RasterLocation, Result};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::info;

/// Read-through cache for the static reference raster.
///
/// The raster is loaded on first use and kept for the lifetime of the cache,
/// which is typically the lifetime of the hosting process. The cache is
/// passed explicitly to whoever needs it; tests build one with
/// [`ReferenceCache::preloaded`] to skip I/O entirely.
///
/// This type is thread-safe and can be shared across threads.
#[derive(Debug)]
pub struct ReferenceCache {
    location: RasterLocation,
    loaded: RwLock<Option<Arc<GeoRaster>>>,
}

impl ReferenceCache {
    /// Create an empty cache for the raster at `location`.
    pub fn new(location: RasterLocation) -> Self {
        Self {
            location,
            loaded: RwLock::new(None),
        }
    }

    /// Create a cache that already holds `raster`.
    pub fn preloaded(location: RasterLocation, raster: GeoRaster) -> Self {
        Self {
            location,
            loaded: RwLock::new(Some(Arc::new(raster))),
        }
    }

    pub fn location(&self) -> &RasterLocation {
        &self.location
    }

    /// Return the reference raster, loading it with `fetcher` on first use.
    pub fn get_or_load(&self, fetcher: &RasterFetcher) -> Result<Arc<GeoRaster>> {
        // Check if already loaded (read lock)
        {
            let loaded = self.loaded.read().map_err(|_| RasterError::CacheLockPoisoned)?;
            if let Some(raster) = loaded.as_ref() {
                return Ok(Arc::clone(raster));
            }
        }

        let start = Instant::now();
        let raster = Arc::new(fetcher.fetch(&self.location)?);
        info!(
            location = %self.location,
            width = raster.width(),
            height = raster.height(),
            epsg = ?raster.epsg(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded reference raster"
        );

        // Another thread may have won the race, keep the first copy
        let mut loaded = self.loaded.write().map_err(|_| RasterError::CacheLockPoisoned)?;
        Ok(Arc::clone(loaded.get_or_insert(raster)))
    }

    /// Check if the raster is currently held in memory.
    pub fn is_loaded(&self) -> bool {
        self.loaded.read().map(|l| l.is_some()).unwrap_or(false)
    }

    /// Drop the in-memory copy; the next access reloads it.
    pub fn clear(&self) {
        if let Ok(mut loaded) = self.loaded.write() {
            *loaded = None;
        }
    }
}
