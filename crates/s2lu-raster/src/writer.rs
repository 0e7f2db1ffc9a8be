//! GeoTIFF encoding.

use crate::crs::{Crs, EPSG_WGS84};
use crate::raster::{
    GeoRaster, KEY_GEOGRAPHIC_TYPE, KEY_MODEL_TYPE, KEY_PROJECTED_CS_TYPE, KEY_RASTER_TYPE,
    MODEL_TYPE_GEOGRAPHIC, MODEL_TYPE_PROJECTED, RASTER_PIXEL_IS_AREA, TAG_GDAL_NODATA,
    TAG_GEO_KEY_DIRECTORY, TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT, TAG_MODEL_TRANSFORMATION,
};
use crate::{RasterError, Result};
use std::io::{Cursor, Seek, Write};
use tiff::encoder::colortype::{Gray16, Gray32Float};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

/// Sample type written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Unsigned 16-bit integers; values are rounded and saturated.
    #[default]
    U16,
    /// 32-bit floats, written unchanged.
    F32,
}

/// Encode a raster as a single-band GeoTIFF.
///
/// Output is a pure function of the raster, so encoding the same raster twice
/// yields identical bytes.
pub fn encode_geotiff(raster: &GeoRaster, format: SampleFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_geotiff(raster, format, Cursor::new(&mut buf))?;
    Ok(buf)
}

/// Write a raster as a single-band GeoTIFF into any seekable sink.
pub fn write_geotiff<W: Write + Seek>(
    raster: &GeoRaster,
    format: SampleFormat,
    writer: W,
) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer)?;
    let (width, height) = raster.dimensions();

    match format {
        SampleFormat::U16 => {
            let data: Vec<u16> = raster
                .data()
                .iter()
                .map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)
                .collect();
            let mut image = encoder.new_image::<Gray16>(width, height)?;
            write_geo_tags(image.encoder(), raster)?;
            image.write_data(&data)?;
        }
        SampleFormat::F32 => {
            let mut image = encoder.new_image::<Gray32Float>(width, height)?;
            write_geo_tags(image.encoder(), raster)?;
            image.write_data(raster.data())?;
        }
    }

    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    raster: &GeoRaster,
) -> Result<()> {
    let gt = raster.transform();

    if gt.is_north_up() {
        let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
        dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tiepoint[..])?;
    } else {
        let [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height] =
            gt.to_gdal();
        #[rustfmt::skip]
        let matrix = [
            pixel_width, row_rotation, 0.0, origin_x,
            col_rotation, pixel_height, 0.0, origin_y,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::Unknown(TAG_MODEL_TRANSFORMATION), &matrix[..])?;
    }

    let geo_keys = geo_key_directory(raster.epsg())?;
    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &geo_keys[..])?;

    if let Some(no_data) = raster.no_data() {
        let text = no_data.to_string();
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())?;
    }

    Ok(())
}

/// GeoKey directory describing the model type and, when known, the EPSG code.
fn geo_key_directory(epsg: Option<u32>) -> Result<Vec<u16>> {
    let mut keys: Vec<[u16; 4]> = Vec::new();

    match epsg {
        Some(code) => {
            let crs = Crs::from_epsg(code)?;
            let code = u16::try_from(code).map_err(|_| RasterError::UnsupportedCrs(code))?;
            if crs.is_geographic() {
                keys.push([KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
                keys.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
                keys.push([KEY_GEOGRAPHIC_TYPE, 0, 1, EPSG_WGS84 as u16]);
            } else {
                keys.push([KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
                keys.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
                keys.push([KEY_PROJECTED_CS_TYPE, 0, 1, code]);
            }
        }
        None => {
            keys.push([KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
            keys.push([KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
        }
    }

    // Version 1.1.0 header followed by the sorted key entries
    let mut dir = vec![1, 1, 0, keys.len() as u16];
    dir.extend(keys.into_iter().flatten());
    Ok(dir)
}
