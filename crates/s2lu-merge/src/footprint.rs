//! Scene footprints.
//!
//! Sentinel-2 tiles carry a no-data border where the swath does not cover
//! the whole 100 km square; the item's `geometry` describes the covered part.

use crate::{MergeError, Result};
use geo::{BoundingRect, Contains, Coord, LineString, MapCoords, MultiPolygon, Point, Polygon};
use s2lu_raster::{Crs, Envelope};
use serde_json::Value;

/// A footprint polygon in some CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    shape: MultiPolygon<f64>,
}

impl Footprint {
    /// Read a GeoJSON `Polygon` or `MultiPolygon` geometry.
    pub fn from_geojson(geometry: &Value) -> Result<Self> {
        let kind = geometry.get("type").and_then(Value::as_str);
        let coordinates = geometry
            .get("coordinates")
            .ok_or_else(|| MergeError::Format("footprint has no coordinates".into()))?;

        let polygons = match kind {
            Some("Polygon") => vec![polygon(coordinates)?],
            Some("MultiPolygon") => coordinates
                .as_array()
                .ok_or_else(|| invalid("MultiPolygon coordinates are not an array"))?
                .iter()
                .map(polygon)
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(MergeError::Format(format!(
                    "unsupported footprint geometry {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            shape: MultiPolygon::new(polygons),
        })
    }

    /// Project a WGS84 footprint into `crs`.
    pub fn project(&self, crs: Crs) -> Self {
        Self {
            shape: self.shape.map_coords(|Coord { x, y }| {
                let (x, y) = crs.project(x, y);
                Coord { x, y }
            }),
        }
    }

    /// Whether a point lies strictly inside the footprint.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.shape.contains(&Point::new(x, y))
    }

    pub fn bounds(&self) -> Option<Envelope> {
        self.shape
            .bounding_rect()
            .map(|r| Envelope::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }
}

fn invalid(msg: &str) -> MergeError {
    MergeError::Format(format!("invalid footprint: {}", msg))
}

fn polygon(rings: &Value) -> Result<Polygon<f64>> {
    let mut rings = rings
        .as_array()
        .ok_or_else(|| invalid("polygon rings are not an array"))?
        .iter()
        .map(ring);

    let exterior = rings.next().ok_or_else(|| invalid("polygon has no rings"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring(positions: &Value) -> Result<LineString<f64>> {
    let coords = positions
        .as_array()
        .ok_or_else(|| invalid("ring is not an array"))?
        .iter()
        .map(|position| match position.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(invalid("position is not numeric")),
            },
            _ => Err(invalid("position needs two coordinates")),
        })
        .collect::<Result<Vec<_>>>()?;

    if coords.len() < 4 {
        return Err(invalid("ring needs at least four positions"));
    }
    Ok(LineString::new(coords))
}
