//! One invocation, from notification payload to stored artifacts.

use crate::align::Alignment;
use crate::merge::{clip_footprint, merge_aligned, Merged};
use crate::output::OutputLocation;
use crate::store::ObjectStore;
use crate::telemetry::metric_defs;
use crate::{InvocationError, MergeConfig, MergeError, SourceScene, Stage};
use s2lu_raster::{encode_geotiff, RasterFetcher, RasterLocation, ReferenceCache, SampleFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Item id reported when the payload could not be parsed.
const UNKNOWN_ITEM: &str = "<unknown>";

/// Everything an invocation needs besides the notification.
///
/// A job is built once per process and reused, so the reference raster is
/// read on the first notification only.
#[derive(Debug)]
pub struct MergeJob {
    config: MergeConfig,
    fetcher: RasterFetcher,
    reference: ReferenceCache,
    store: Box<dyn ObjectStore>,
    next_staging: AtomicU64,
}

impl MergeJob {
    /// Build a job from validated settings.
    pub fn new(config: MergeConfig, store: Box<dyn ObjectStore>) -> Result<Self, MergeError> {
        let fetcher = match &config.download_dir {
            Some(dir) => RasterFetcher::with_download_dir(dir)?,
            None => RasterFetcher::new()?,
        };
        let reference = ReferenceCache::new(RasterLocation::parse(&config.reference)?);
        Ok(Self::from_parts(config, fetcher, reference, store))
    }

    /// Build a job from existing parts, e.g. a preloaded reference cache.
    pub fn from_parts(
        config: MergeConfig,
        fetcher: RasterFetcher,
        reference: ReferenceCache,
        store: Box<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            reference,
            store,
            next_staging: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn reference(&self) -> &ReferenceCache {
        &self.reference
    }

    /// Handle one notification payload.
    ///
    /// On success the derived raster (and sidecar, if enabled) has been
    /// stored. On failure nothing new is left in storage.
    pub fn handle_event(&self, payload: &str) -> Result<OutputLocation, InvocationError> {
        let rule = self.config.rule.build();
        metrics::counter!(metric_defs::INVOCATIONS.name, "rule" => rule.name()).increment(1);

        let result = self.run(payload, rule.as_ref());
        if let Err(err) = &result {
            metrics::counter!(
                metric_defs::FAILURES.name,
                "stage" => err.stage.as_str(),
                "error" => err.source.kind()
            )
            .increment(1);

            if let MergeError::GeometryMismatch { .. } = err.source {
                warn!(item_id = %err.item_id, error = %err.source, "rasters do not overlap, nothing written");
            }
        }
        result
    }

    fn run(
        &self,
        payload: &str,
        rule: &dyn crate::PixelRule,
    ) -> Result<OutputLocation, InvocationError> {
        let scene = SourceScene::from_json(payload)
            .map_err(|e| InvocationError::new(UNKNOWN_ITEM, Stage::Parse, e))?;
        let fail = |stage: Stage| {
            let item_id = scene.item_id.clone();
            move |source: MergeError| InvocationError::new(item_id, stage, source)
        };

        info!(
            item_id = %scene.item_id,
            scene_id = %scene.scene_id,
            source = %scene.source_href,
            cloud_cover = ?scene.cloud_cover,
            "handling notification"
        );

        // Fetch the source raster
        let source = RasterLocation::parse(&scene.source_href)
            .and_then(|location| self.fetcher.fetch(&location))
            .map_err(MergeError::from)
            .map_err(fail(Stage::FetchSource))?;
        debug!(
            width = source.width(),
            height = source.height(),
            epsg = ?source.epsg(),
            envelope = %source.envelope(),
            "fetched source raster"
        );

        // Shared reference raster
        let reference = self
            .reference
            .get_or_load(&self.fetcher)
            .map_err(MergeError::from)
            .map_err(fail(Stage::LoadReference))?;

        let start = Instant::now();
        let alignment = Alignment::new(&source, &reference, self.config.default_epsg)
            .map_err(fail(Stage::Align))?;
        let footprint =
            clip_footprint(&scene, &alignment, &self.config).map_err(fail(Stage::Align))?;

        let Merged { raster, summary } =
            merge_aligned(&source, &reference, &alignment, rule, footprint.as_ref())
                .map_err(fail(Stage::Merge))?;
        metrics::histogram!(metric_defs::MERGE_DURATION.name)
            .record(start.elapsed().as_secs_f64() * 1000.0);
        metrics::counter!(metric_defs::PIXELS_MERGED.name, "rule" => rule.name())
            .increment(summary.overlap_pixels);
        if let Some(cover) = summary.cover.and_then(|c| c.urban_cover) {
            metrics::gauge!(metric_defs::URBAN_COVER.name, "tile" => scene.scene_id.tile.to_string())
                .set(cover);
        }

        // Encode everything before touching storage
        let location =
            OutputLocation::new(&self.config.output_prefix, scene.scene_id, self.config.write_summary);
        let raster_bytes = encode_geotiff(&raster, SampleFormat::U16)
            .map_err(MergeError::from)
            .map_err(fail(Stage::Write))?;
        let summary_bytes = match &location.summary_key {
            Some(_) => Some(
                summary
                    .sidecar_bytes(&scene.item)
                    .map_err(|e| MergeError::Format(format!("failed to encode summary: {}", e)))
                    .map_err(fail(Stage::Write))?,
            ),
            None => None,
        };

        let mut outputs = vec![(location.raster_key.as_str(), raster_bytes)];
        if let (Some(key), Some(bytes)) = (&location.summary_key, summary_bytes) {
            outputs.push((key.as_str(), bytes));
        }
        self.write_outputs(&outputs).map_err(fail(Stage::Write))?;

        info!(
            item_id = %scene.item_id,
            output = %self.store.describe(&location.raster_key),
            overlap_pixels = summary.overlap_pixels,
            nodata_pixels = summary.nodata_pixels,
            urban_cover = ?summary.cover.and_then(|c| c.urban_cover),
            "stored derived raster"
        );
        Ok(location)
    }

    /// Stage every output under a temporary key, then move them into place.
    ///
    /// Existing objects are only replaced once every staged write succeeded;
    /// on failure the staged objects are removed and previous outputs stay.
    fn write_outputs(&self, outputs: &[(&str, Vec<u8>)]) -> Result<(), MergeError> {
        let mut staged: Vec<(String, &str)> = Vec::with_capacity(outputs.len());

        for (key, bytes) in outputs {
            let staging = self.staging_key(key);
            if let Err(source) = self.store.put(&staging, bytes) {
                self.discard(&staged);
                return Err(MergeError::Write {
                    key: key.to_string(),
                    source,
                });
            }
            metrics::counter!(metric_defs::OUTPUT_BYTES.name).increment(bytes.len() as u64);
            staged.push((staging, *key));
        }

        for (index, (staging, key)) in staged.iter().enumerate() {
            if let Err(source) = self.store.rename(staging, key) {
                self.discard(&staged[index..]);
                return Err(MergeError::Write {
                    key: key.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn staging_key(&self, key: &str) -> String {
        format!(
            "{}.{}-{}.staged",
            key,
            std::process::id(),
            self.next_staging.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn discard(&self, staged: &[(String, &str)]) {
        for (staging, _) in staged {
            if let Err(err) = self.store.delete(staging) {
                warn!(key = %staging, error = %err, "failed to remove staged object");
            }
        }
    }
}
