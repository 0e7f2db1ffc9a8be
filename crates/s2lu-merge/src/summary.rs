//! Per-scene statistics and the JSON sidecar.

use crate::rule::CoverStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Statistics of one merged scene.
///
/// Serialized under the `land_use` member of the sidecar, next to the STAC
/// item that triggered the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Name of the pixel rule.
    pub rule: String,
    pub width: u32,
    pub height: u32,
    /// EPSG code of the derived raster, if known.
    pub epsg: Option<u32>,
    /// Source pixels with a reference pixel under their centre.
    pub overlap_pixels: u64,
    /// Overlap pixels dropped for lying outside the scene footprint.
    pub clipped_pixels: u64,
    /// Derived pixels set to the no-data sentinel.
    pub nodata_pixels: u64,
    /// Pixel count per derived class, no-data excluded.
    pub class_counts: BTreeMap<u16, u64>,
    /// Rule-specific cover statistics.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub cover: Option<CoverStats>,
    /// Overlap of source and reference, `[min_x, min_y, max_x, max_y]`.
    pub aoi_extent: [f64; 4],
    /// Extent of the source raster.
    pub source_extent: [f64; 4],
}

impl MergeSummary {
    /// The STAC item with this summary attached as `land_use`.
    pub fn sidecar(&self, item: &Value) -> serde_json::Result<Value> {
        let mut sidecar = item.clone();
        let land_use = serde_json::to_value(self)?;
        match sidecar.as_object_mut() {
            Some(object) => {
                object.insert("land_use".into(), land_use);
            }
            None => {
                sidecar = serde_json::json!({ "item": item, "land_use": land_use });
            }
        }
        Ok(sidecar)
    }

    /// Pretty-printed sidecar bytes.
    pub fn sidecar_bytes(&self, item: &Value) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&self.sidecar(item)?)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
