//! Bringing the reference raster onto the source grid.
//!
//! The source grid is authoritative: the output has the source raster's
//! extent and resolution, and every output pixel samples the reference pixel
//! that contains the output pixel's centre (nearest neighbour).

use crate::{MergeError, Result};
use s2lu_raster::{CoordTransform, Crs, Envelope, GeoRaster, Window};
use tracing::{debug, warn};

/// Points sampled along each reference edge when projecting its envelope.
const EDGE_SAMPLES: u32 = 16;

/// How source pixels map onto the reference raster.
#[derive(Debug, Clone)]
pub struct Alignment {
    source_crs: Option<Crs>,
    reference_crs: Option<Crs>,
    /// Source CRS to reference CRS; `None` when both share a frame.
    to_reference: Option<CoordTransform>,
    /// Reference envelope expressed in the source CRS.
    reference_extent: Envelope,
    /// Overlap of both rasters, in the source CRS.
    overlap: Envelope,
    /// Source pixels whose centres fall inside the overlap.
    window: Window,
}

impl Alignment {
    /// Work out how `reference` lines up with `source`.
    ///
    /// Rasters without an EPSG code take `default_epsg`. When either side
    /// still has none, both are assumed to share a frame.
    ///
    /// Fails with [`MergeError::GeometryMismatch`] when the rasters do not
    /// overlap and [`MergeError::Format`] for unsupported CRSs.
    pub fn new(source: &GeoRaster, reference: &GeoRaster, default_epsg: Option<u32>) -> Result<Self> {
        let source_crs = resolve_crs(source.epsg(), default_epsg)?;
        let reference_crs = resolve_crs(reference.epsg(), default_epsg)?;

        let to_reference = match (source_crs, reference_crs) {
            (Some(from), Some(to)) => Some(CoordTransform::new(from, to)),
            _ => {
                warn!(
                    source_epsg = ?source.epsg(),
                    reference_epsg = ?reference.epsg(),
                    "raster without CRS, assuming source and reference share a frame"
                );
                None
            }
        }
        .filter(|t| !t.is_identity());

        let reference_extent = match (reference_crs, source_crs, to_reference) {
            (Some(from), Some(to), Some(_)) => {
                project_envelope(reference, CoordTransform::new(from, to))
            }
            _ => reference.envelope(),
        };

        let source_extent = source.envelope();
        let mismatch = || MergeError::GeometryMismatch {
            source_extent,
            reference_extent,
        };

        let overlap = source_extent.intersection(&reference_extent).ok_or_else(mismatch)?;
        let window = source.reading_window(&overlap);
        if window.is_empty() {
            return Err(mismatch());
        }

        debug!(
            source_crs = ?source_crs.map(|c| c.epsg()),
            reference_crs = ?reference_crs.map(|c| c.epsg()),
            overlap = %overlap,
            window_width = window.width(),
            window_height = window.height(),
            "aligned rasters"
        );

        Ok(Self {
            source_crs,
            reference_crs,
            to_reference,
            reference_extent,
            overlap,
            window,
        })
    }

    pub fn source_crs(&self) -> Option<Crs> {
        self.source_crs
    }

    pub fn reference_crs(&self) -> Option<Crs> {
        self.reference_crs
    }

    /// Reference envelope in the source CRS.
    pub fn reference_extent(&self) -> Envelope {
        self.reference_extent
    }

    /// Overlap of source and reference, in the source CRS.
    pub fn overlap(&self) -> Envelope {
        self.overlap
    }

    /// Source pixel window covering the overlap.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Reference pixel under the centre of source pixel `(col, row)`.
    ///
    /// `None` when the centre falls outside the overlap window or off the
    /// reference raster.
    pub fn reference_pixel(
        &self,
        source: &GeoRaster,
        reference: &GeoRaster,
        col: u32,
        row: u32,
    ) -> Option<(u32, u32)> {
        if !self.window.contains(col, row) {
            return None;
        }

        let (x, y) = source.transform().pixel_center(col, row);
        let (x, y) = match self.to_reference {
            Some(transform) => transform.apply(x, y),
            None => (x, y),
        };
        reference.pixel_at(x, y)
    }
}

fn resolve_crs(epsg: Option<u32>, default_epsg: Option<u32>) -> Result<Option<Crs>> {
    epsg.or(default_epsg)
        .map(Crs::from_epsg)
        .transpose()
        .map_err(MergeError::from)
}

/// Envelope of a raster after projecting its outline.
///
/// Edges are sampled rather than just the corners, since a straight edge in
/// one CRS is curved in the other.
fn project_envelope(raster: &GeoRaster, transform: CoordTransform) -> Envelope {
    let (w, h) = (raster.width() as f64, raster.height() as f64);
    let gt = raster.transform();

    let outline = (0..=EDGE_SAMPLES).flat_map(|i| {
        let t = i as f64 / EDGE_SAMPLES as f64;
        [
            gt.apply(t * w, 0.0),
            gt.apply(t * w, h),
            gt.apply(0.0, t * h),
            gt.apply(w, t * h),
        ]
    });

    Envelope::from_points(outline.map(|(x, y)| transform.apply(x, y)))
}
