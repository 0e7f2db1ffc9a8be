//! Single-band georeferenced raster.

use crate::geotransform::{Envelope, GeoTransform, Window};
use crate::{RasterError, Result};
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

/// ModelPixelScaleTag.
pub(crate) const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
/// ModelTiepointTag.
pub(crate) const TAG_MODEL_TIEPOINT: u16 = 33922;
/// ModelTransformationTag.
pub(crate) const TAG_MODEL_TRANSFORMATION: u16 = 34264;
/// GeoKeyDirectoryTag.
pub(crate) const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
/// GDAL_NODATA, stored as an ASCII string.
pub(crate) const TAG_GDAL_NODATA: u16 = 42113;

pub(crate) const KEY_MODEL_TYPE: u16 = 1024;
pub(crate) const KEY_RASTER_TYPE: u16 = 1025;
pub(crate) const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
pub(crate) const KEY_PROJECTED_CS_TYPE: u16 = 3072;

pub(crate) const MODEL_TYPE_PROJECTED: u16 = 1;
pub(crate) const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
pub(crate) const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// A single-band raster with its georeferencing.
///
/// Samples are stored as `f32` in row-major order (north to south, west to
/// east) whatever the sample type on disk; every integer class code used by
/// Sentinel-2 or land-use products is exactly representable.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    data: Vec<f32>,
    width: u32,
    height: u32,
    transform: GeoTransform,
    /// EPSG code read from the GeoKey directory, if any.
    epsg: Option<u32>,
    /// Samples equal to this value carry no data.
    no_data: Option<f32>,
}

impl GeoRaster {
    /// Create a raster from row-major samples.
    pub fn new(data: Vec<f32>, width: u32, height: u32, transform: GeoTransform) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(RasterError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            transform,
            epsg: None,
            no_data: None,
        })
    }

    /// Create a raster with every sample set to `value`.
    pub fn filled(value: f32, width: u32, height: u32, transform: GeoTransform) -> Self {
        Self {
            data: vec![value; width as usize * height as usize],
            width,
            height,
            transform,
            epsg: None,
            no_data: None,
        }
    }

    pub fn with_epsg(mut self, epsg: Option<u32>) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn with_no_data(mut self, no_data: Option<f32>) -> Self {
        self.no_data = no_data;
        self
    }

    /// Load a raster from a GeoTIFF file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::decode(std::io::BufReader::new(file))
    }

    /// Load a raster from an in-memory GeoTIFF.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode(Cursor::new(bytes))
    }

    fn decode<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut decoder = Decoder::new(reader)?;

        // Land-use references can cover a whole region at 10 m
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(RasterError::UnsupportedDataType(format!(
                    "{:?} (only single-band rasters are supported)",
                    other
                )))
            }
        }

        let (width, height) = decoder.dimensions()?;
        let geo_keys = read_geo_keys(&mut decoder);
        let transform = read_geotransform(&mut decoder, &geo_keys)?;
        let epsg = epsg_from_geo_keys(&geo_keys);
        let no_data = read_no_data(&mut decoder);
        let data = decode_samples(&mut decoder)?;

        let raster = Self::new(data, width, height, transform)?;
        Ok(raster.with_epsg(epsg).with_no_data(no_data))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Dimensions as `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn no_data(&self) -> Option<f32> {
        self.no_data
    }

    /// Row-major samples.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Sample at a pixel, `None` outside the raster.
    pub fn get(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        Some(self.data[row as usize * self.width as usize + col as usize])
    }

    /// Whether a sample value is this raster's no-data value.
    pub fn is_no_data(&self, value: f32) -> bool {
        match self.no_data {
            Some(nd) if nd.is_nan() => value.is_nan(),
            Some(nd) => value == nd,
            None => false,
        }
    }

    /// Pixel containing a map coordinate, `None` outside the raster.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let (col, row) = self.transform.invert(x, y)?;
        let (col, row) = (col.floor(), row.floor());
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return None;
        }
        Some((col as u32, row as u32))
    }

    /// Spatial envelope of the raster.
    pub fn envelope(&self) -> Envelope {
        self.transform.envelope(self.width, self.height)
    }

    /// Cell size as `(x, y)`, both positive.
    pub fn resolution(&self) -> (f64, f64) {
        let env = self.envelope();
        (env.width() / self.width as f64, env.height() / self.height as f64)
    }

    /// Pixel window covering `bbox`, clamped to the raster.
    ///
    /// Window edges are rounded to the nearest pixel boundary.
    pub fn reading_window(&self, bbox: &Envelope) -> Window {
        let env = self.envelope();
        let (res_x, res_y) = self.resolution();

        let clamp = |v: f64, max: u32| v.round().clamp(0.0, max as f64) as u32;

        Window {
            left: clamp((bbox.min_x - env.min_x) / res_x, self.width),
            top: clamp((env.max_y - bbox.max_y) / res_y, self.height),
            right: clamp((bbox.max_x - env.min_x) / res_x, self.width),
            bottom: clamp((env.max_y - bbox.min_y) / res_y, self.height),
        }
    }
}

/// Raw GeoKey directory entries as `(key, value)` for inline SHORT values.
fn read_geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Vec<(u16, u16)> {
    let Ok(dir) = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag) else {
        return Vec::new();
    };
    if dir.len() < 4 {
        return Vec::new();
    }

    // Header: version, revision, minor revision, number of keys
    let count = dir[3] as usize;
    dir[4..]
        .chunks_exact(4)
        .take(count)
        .filter(|entry| entry[1] == 0) // location 0: value stored inline
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn geo_key(keys: &[(u16, u16)], key: u16) -> Option<u16> {
    keys.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn epsg_from_geo_keys(keys: &[(u16, u16)]) -> Option<u32> {
    let projected = geo_key(keys, KEY_PROJECTED_CS_TYPE).filter(|v| *v != USER_DEFINED);
    if let Some(code) = projected {
        return Some(code as u32);
    }
    if geo_key(keys, KEY_MODEL_TYPE) == Some(MODEL_TYPE_GEOGRAPHIC) {
        return geo_key(keys, KEY_GEOGRAPHIC_TYPE)
            .filter(|v| *v != USER_DEFINED)
            .map(u32::from);
    }
    None
}

/// Read the affine transform from ModelTransformation or ModelTiepoint + ModelPixelScale.
fn read_geotransform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    geo_keys: &[(u16, u16)],
) -> Result<GeoTransform> {
    let mut transform = if let Ok(m) =
        decoder.get_tag_f64_vec(Tag::ModelTransformationTag)
    {
        if m.len() < 16 {
            return Err(RasterError::InvalidGeoTiff(format!(
                "ModelTransformationTag has {} values, expected 16",
                m.len()
            )));
        }
        GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]])
    } else {
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
        let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

        match (tiepoint, pixel_scale) {
            (Ok(tp), Ok(scale)) if tp.len() >= 6 && scale.len() >= 2 => {
                // Tiepoint format: [i, j, k, x, y, z] ties pixel (i, j) to map (x, y)
                let origin_x = tp[3] - tp[0] * scale[0];
                let origin_y = tp[4] + tp[1] * scale[1];
                GeoTransform::new(origin_x, origin_y, scale[0], -scale[1])
            }
            _ => {
                return Err(RasterError::InvalidGeoTiff(
                    "missing ModelTransformation or ModelTiepoint/ModelPixelScale tags".into(),
                ))
            }
        }
    };

    if transform.invert(transform.origin_x, transform.origin_y).is_none() {
        return Err(RasterError::InvalidGeoTiff("degenerate geotransform".into()));
    }

    // PixelIsPoint rasters tie the pixel centre, shift to the corner
    if geo_key(geo_keys, KEY_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
        let (x, y) = transform.apply(-0.5, -0.5);
        transform.origin_x = x;
        transform.origin_y = y;
    }

    Ok(transform)
}

fn read_no_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok())
}

fn decode_samples<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
    let result = decoder.read_image()?;

    match result {
        DecodingResult::F32(data) => Ok(data),
        DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
    }
}
