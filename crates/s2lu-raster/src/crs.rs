//! Coordinate reference systems and WGS84 ↔ UTM conversion.
//!
//! Sentinel-2 products are delivered in UTM (EPSG 326xx / 327xx) and footprints
//! in WGS84 (EPSG 4326), so those are the only systems supported. Formulas
//! follow Snyder, *Map Projections: A Working Manual* (USGS PP 1395), §8.

use crate::{RasterError, Result};

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// EPSG code of WGS84 geographic coordinates.
pub const EPSG_WGS84: u32 = 4326;

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Geographic WGS84, coordinates are (longitude, latitude) in degrees.
    Wgs84,
    /// WGS84 / UTM, coordinates are (easting, northing) in metres.
    Utm {
        /// Zone number, 1-60.
        zone: u32,
        /// Northern hemisphere.
        north: bool,
    },
}

impl Crs {
    /// Look up a supported CRS by EPSG code.
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        match epsg {
            EPSG_WGS84 => Ok(Crs::Wgs84),
            32601..=32660 => Ok(Crs::Utm {
                zone: epsg - 32600,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: epsg - 32700,
                north: false,
            }),
            _ => Err(RasterError::UnsupportedCrs(epsg)),
        }
    }

    /// EPSG code of this CRS.
    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Wgs84 => EPSG_WGS84,
            Crs::Utm { zone, north: true } => 32600 + zone,
            Crs::Utm { zone, north: false } => 32700 + zone,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Convert a coordinate in this CRS to WGS84 (lon, lat).
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Crs::Wgs84 => (x, y),
            Crs::Utm { zone, north } => utm_to_wgs84(x, y, zone, north),
        }
    }

    /// Convert a WGS84 (lon, lat) coordinate into this CRS.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Crs::Wgs84 => (lon, lat),
            Crs::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Converts coordinates from one CRS to another through WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordTransform {
    from: Crs,
    to: Crs,
}

impl CoordTransform {
    pub fn new(from: Crs, to: Crs) -> Self {
        Self { from, to }
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (lon, lat) = self.from.unproject(x, y);
        self.to.project(lon, lat)
    }
}

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a * a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9 and 8-10
    let easting = K0
        * n
        * (a + (1.0 - t + c) * a2 * a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a / 120.0)
        + FALSE_EASTING;
    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    if north {
        (easting, northing)
    } else {
        (easting, northing + FALSE_NORTHING_SOUTH)
    }
}

fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;

    // Footpoint latitude, Snyder eq. 7-19 and 3-26
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - E2).sqrt()) / (1.0 + (1.0 - E2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let c1 = E_PRIME2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let denom = 1.0 - E2 * sin1 * sin1;
    let n1 = A / denom.sqrt();
    let r1 = A * (1.0 - E2) / denom.powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    // Snyder eq. 8-17 and 8-18
    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d4
                * d
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from the equator to `lat` (radians), Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_from_epsg() {
        assert_eq!(Crs::from_epsg(4326).unwrap(), Crs::Wgs84);
        assert_eq!(
            Crs::from_epsg(32630).unwrap(),
            Crs::Utm {
                zone: 30,
                north: true
            }
        );
        assert_eq!(
            Crs::from_epsg(32721).unwrap(),
            Crs::Utm {
                zone: 21,
                north: false
            }
        );
        assert!(Crs::from_epsg(3857).is_err());
        assert!(Crs::from_epsg(32600).is_err());
        assert!(Crs::from_epsg(32761).is_err());
    }

    #[test]
    fn test_epsg_roundtrip() {
        for epsg in [4326, 32601, 32630, 32660, 32701, 32760] {
            assert_eq!(Crs::from_epsg(epsg).unwrap().epsg(), epsg);
        }
    }

    // Madrid, reference values from PROJ (EPSG:4326 -> EPSG:32630)
    #[test]
    fn test_madrid_to_utm30n() {
        let crs = Crs::from_epsg(32630).unwrap();
        let (e, n) = crs.project(-3.7037, 40.4168);
        assert_abs_diff_eq!(e, 440_298.94, epsilon = 1.0);
        assert_abs_diff_eq!(n, 4_474_257.31, epsilon = 1.0);
    }

    #[test]
    fn test_buenos_aires_to_utm21s() {
        let crs = Crs::from_epsg(32721).unwrap();
        let (e, n) = crs.project(-58.3816, -34.6037);
        assert_abs_diff_eq!(e, 373_317.50, epsilon = 1.0);
        assert_abs_diff_eq!(n, 6_170_036.17, epsilon = 1.0);
    }

    #[test]
    fn test_utm_inverse() {
        let crs = Crs::from_epsg(32630).unwrap();
        let (lon, lat) = crs.unproject(440_298.94, 4_474_257.31);
        assert_abs_diff_eq!(lon, -3.7037, epsilon = 1e-5);
        assert_abs_diff_eq!(lat, 40.4168, epsilon = 1e-5);

        let south = Crs::from_epsg(32721).unwrap();
        let (lon, lat) = south.unproject(373_317.50, 6_170_036.17);
        assert_abs_diff_eq!(lon, -58.3816, epsilon = 1e-5);
        assert_abs_diff_eq!(lat, -34.6037, epsilon = 1e-5);
    }

    #[test]
    fn test_central_meridian_maps_to_false_easting() {
        let crs = Crs::Utm {
            zone: 30,
            north: true,
        };
        let (e, n) = crs.project(-3.0, 0.0);
        assert_abs_diff_eq!(e, 500_000.0, epsilon = 0.01);
        assert_abs_diff_eq!(n, 0.0, epsilon = 0.01);
    }

    #[test]
    fn test_transform_between_zones() {
        // A point near the 30/31 boundary expressed in both zones
        let z30 = Crs::from_epsg(32630).unwrap();
        let z31 = Crs::from_epsg(32631).unwrap();
        let (x30, y30) = z30.project(0.1, 42.0);
        let (x31, y31) = z31.project(0.1, 42.0);

        let (x, y) = CoordTransform::new(z30, z31).apply(x30, y30);
        assert_abs_diff_eq!(x, x31, epsilon = 0.5);
        assert_abs_diff_eq!(y, y31, epsilon = 0.5);
        assert!(CoordTransform::new(z30, z30).is_identity());
    }
}
