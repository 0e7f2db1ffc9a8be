//! The raster merge itself.

use crate::align::Alignment;
use crate::footprint::Footprint;
use crate::rule::{PixelRule, NODATA_SENTINEL};
use crate::summary::MergeSummary;
use crate::{MergeConfig, MergeError, Result, SourceScene};
use s2lu_raster::GeoRaster;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A derived raster and its statistics.
#[derive(Debug, Clone)]
pub struct Merged {
    /// Derived classes on the source grid; every sample is a `u16` value and
    /// the no-data value is [`NODATA_SENTINEL`].
    pub raster: GeoRaster,
    pub summary: MergeSummary,
}

/// Align, clip and merge one scene.
pub fn merge(
    scene: &SourceScene,
    source: &GeoRaster,
    reference: &GeoRaster,
    config: &MergeConfig,
) -> Result<Merged> {
    let alignment = Alignment::new(source, reference, config.default_epsg)?;
    let footprint = clip_footprint(scene, &alignment, config)?;
    let rule = config.rule.build();
    merge_aligned(source, reference, &alignment, rule.as_ref(), footprint.as_ref())
}

/// The scene footprint in the source CRS, when clipping applies.
pub fn clip_footprint(
    scene: &SourceScene,
    alignment: &Alignment,
    config: &MergeConfig,
) -> Result<Option<Footprint>> {
    if !config.clip_to_footprint {
        return Ok(None);
    }
    let Some(geometry) = scene.footprint.as_ref() else {
        return Ok(None);
    };

    let footprint = Footprint::from_geojson(geometry)?;
    match alignment.source_crs() {
        Some(crs) => Ok(Some(footprint.project(crs))),
        None => {
            warn!(
                item_id = %scene.item_id,
                "source raster has no CRS, footprint clip skipped"
            );
            Ok(None)
        }
    }
}

/// Apply `rule` to every source pixel that has a reference pixel under it.
///
/// Pixels outside the overlap, outside `footprint`, or where either input is
/// no-data get [`NODATA_SENTINEL`].
pub fn merge_aligned(
    source: &GeoRaster,
    reference: &GeoRaster,
    alignment: &Alignment,
    rule: &dyn PixelRule,
    footprint: Option<&Footprint>,
) -> Result<Merged> {
    let (width, height) = source.dimensions();
    let stride = width as usize;
    let mut data = vec![f32::from(NODATA_SENTINEL); stride * height as usize];

    let footprint_bounds = footprint.and_then(Footprint::bounds);
    let window = alignment.window();
    let mut overlap_pixels = 0u64;
    let mut clipped_pixels = 0u64;

    for row in window.top..window.bottom {
        for col in window.left..window.right {
            let Some((ref_col, ref_row)) =
                alignment.reference_pixel(source, reference, col, row)
            else {
                continue;
            };
            let Some(reference_value) = reference.get(ref_col, ref_row) else {
                continue;
            };
            overlap_pixels += 1;

            if let Some(footprint) = footprint {
                let (x, y) = source.transform().pixel_center(col, row);
                let inside = footprint_bounds.is_some_and(|b| b.contains(x, y))
                    && footprint.contains(x, y);
                if !inside {
                    clipped_pixels += 1;
                    continue;
                }
            }

            let idx = row as usize * stride + col as usize;
            let source_value = source.data()[idx];
            if source.is_no_data(source_value) || reference.is_no_data(reference_value) {
                continue;
            }
            data[idx] = f32::from(rule.apply(source_value, reference_value));
        }
    }

    let source_extent = source.envelope();
    if overlap_pixels == 0 {
        return Err(MergeError::GeometryMismatch {
            source_extent,
            reference_extent: alignment.reference_extent(),
        });
    }

    let mut class_counts = BTreeMap::new();
    for value in &data {
        let class = *value as u16;
        if class != NODATA_SENTINEL {
            *class_counts.entry(class).or_insert(0u64) += 1;
        }
    }
    let valid: u64 = class_counts.values().sum();

    let epsg = alignment.source_crs().map(|crs| crs.epsg());
    let summary = MergeSummary {
        rule: rule.name().to_string(),
        width,
        height,
        epsg,
        overlap_pixels,
        clipped_pixels,
        nodata_pixels: data.len() as u64 - valid,
        cover: rule.cover(&class_counts),
        class_counts,
        aoi_extent: alignment.overlap().to_array(),
        source_extent: source_extent.to_array(),
    };

    debug!(
        rule = %summary.rule,
        overlap_pixels,
        clipped_pixels,
        nodata_pixels = summary.nodata_pixels,
        "merged rasters"
    );

    let raster = GeoRaster::new(data, width, height, *source.transform())?
        .with_epsg(epsg)
        .with_no_data(Some(f32::from(NODATA_SENTINEL)));

    Ok(Merged { raster, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{MaskRule, RuleConfig, UrbanCoverRule};
    use s2lu_raster::GeoTransform;
    use serde_json::json;

    const NODATA: f32 = NODATA_SENTINEL as f32;

    fn grid(values: Vec<f32>, width: u32, height: u32) -> GeoRaster {
        GeoRaster::new(values, width, height, GeoTransform::new(0.0, height as f64, 1.0, -1.0))
            .unwrap()
    }

    fn merged(source: &GeoRaster, reference: &GeoRaster, rule: &dyn PixelRule) -> Merged {
        let alignment = Alignment::new(source, reference, None).unwrap();
        merge_aligned(source, reference, &alignment, rule, None).unwrap()
    }

    #[test]
    fn test_mask_scenario() {
        let source = grid(vec![0.0, 0.0, 1.0, 0.0], 2, 2);
        let reference = grid(vec![5.0, 6.0, 7.0, 8.0], 2, 2);

        let out = merged(&source, &reference, &MaskRule::default());
        assert_eq!(out.raster.data(), &[5.0, 6.0, NODATA, 8.0]);
        assert_eq!(out.raster.no_data(), Some(NODATA));
        assert_eq!(out.summary.overlap_pixels, 4);
        assert_eq!(out.summary.nodata_pixels, 1);
        assert_eq!(out.summary.class_counts, BTreeMap::from([(5, 1), (6, 1), (8, 1)]));
        assert!(out.summary.cover.is_none());
    }

    #[test]
    fn test_outside_overlap_is_nodata() {
        // 4x1 source, reference covers only the two western pixels
        let source = grid(vec![0.0; 4], 4, 1);
        let reference = GeoRaster::new(
            vec![3.0, 4.0],
            2,
            1,
            GeoTransform::new(0.0, 1.0, 1.0, -1.0),
        )
        .unwrap();

        let out = merged(&source, &reference, &MaskRule::default());
        assert_eq!(out.raster.data(), &[3.0, 4.0, NODATA, NODATA]);
        assert_eq!(out.raster.dimensions(), source.dimensions());
        assert_eq!(out.raster.transform(), source.transform());
        assert_eq!(out.summary.overlap_pixels, 2);
        assert_eq!(out.summary.aoi_extent, [0.0, 0.0, 2.0, 1.0]);
    }

    #[test]
    fn test_coarser_reference_is_sampled_nearest() {
        // 4x4 source at 1 m over a 2x2 reference at 2 m
        let source = grid(vec![0.0; 16], 4, 4);
        let reference = GeoRaster::new(
            vec![1.0, 2.0, 3.0, 4.0],
            2,
            2,
            GeoTransform::new(0.0, 4.0, 2.0, -2.0),
        )
        .unwrap();

        let out = merged(&source, &reference, &MaskRule::default());
        #[rustfmt::skip]
        let expected = [
            1.0, 1.0, 2.0, 2.0,
            1.0, 1.0, 2.0, 2.0,
            3.0, 3.0, 4.0, 4.0,
            3.0, 3.0, 4.0, 4.0,
        ];
        assert_eq!(out.raster.data(), &expected);
    }

    #[test]
    fn test_no_data_inputs() {
        let source = grid(vec![0.0, 0.0, 0.0, 0.0], 2, 2).with_no_data(Some(0.0));
        let reference = grid(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
        let out = merged(&source, &reference, &MaskRule::new([0, 1]));
        assert!(out.raster.data().iter().all(|v| *v == NODATA));

        let source = grid(vec![4.0; 4], 2, 2);
        let reference = grid(vec![5.0, 255.0, 0.0, 1.0], 2, 2).with_no_data(Some(255.0));
        let out = merged(&source, &reference, &UrbanCoverRule::default());
        assert_eq!(out.raster.data(), &[2.0, NODATA, 2.0, 0.0]);

        let cover = out.summary.cover.unwrap();
        assert_eq!(cover.urban_pixels, 2);
        assert_eq!(cover.valid_urban_pixels, 2);
        assert_eq!(cover.urban_cover, Some(100.0));
    }

    #[test]
    fn test_footprint_clip() {
        let source = grid(vec![0.0; 4], 2, 2).with_epsg(Some(4326));
        let reference = grid(vec![5.0, 6.0, 7.0, 8.0], 2, 2).with_epsg(Some(4326));

        // Triangle x + y < 2.5 leaves out only the top-right pixel centre
        let scene = SourceScene::from_value(json!({
            "id": "S2B_31NAA_20240101_0_L2A",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [2.5, 0.0], [0.0, 2.5], [0.0, 0.0]]]
            },
            "properties": {},
            "assets": { "SCL": { "href": "scl.tif" } }
        }))
        .unwrap();

        let config = MergeConfig::default();
        let out = merge(&scene, &source, &reference, &config).unwrap();
        assert_eq!(out.raster.data(), &[5.0, NODATA, 7.0, 8.0]);
        assert_eq!(out.summary.clipped_pixels, 1);

        let config = MergeConfig {
            clip_to_footprint: false,
            rule: RuleConfig::default(),
            ..MergeConfig::default()
        };
        let out = merge(&scene, &source, &reference, &config).unwrap();
        assert_eq!(out.raster.data(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_disjoint_is_geometry_mismatch() {
        let source = grid(vec![0.0; 4], 2, 2);
        let reference = GeoRaster::new(vec![1.0; 4], 2, 2, GeoTransform::new(50.0, 2.0, 1.0, -1.0))
            .unwrap();
        assert!(matches!(
            Alignment::new(&source, &reference, None),
            Err(MergeError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_merge_is_deterministic() {
        let source = grid(vec![0.0, 4.0, 9.0, 0.0], 2, 2);
        let reference = grid(vec![5.0, 0.0, 5.0, 1.0], 2, 2);
        let rule = UrbanCoverRule::default();

        let a = merged(&source, &reference, &rule);
        let b = merged(&source, &reference, &rule);
        assert_eq!(a.raster, b.raster);
        assert_eq!(a.summary, b.summary);
    }
}
