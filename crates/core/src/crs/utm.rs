//! WGS84 <-> UTM (Snyder 1987, USGS Prof. Paper 1395, pp. 57-64).
//!
//! Covers EPSG 326xx (UTM North) and 327xx (UTM South), the native grids of
//! every Sentinel-2 L2A tile.

use super::wgs84::{A, E2};

const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A UTM zone and hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub number: u8,
    pub north: bool,
}

impl UtmZone {
    /// Parse an EPSG code: 326xx is north, 327xx is south.
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        let (number, north) = if (32601..=32660).contains(&epsg) {
            (epsg - 32600, true)
        } else if (32701..=32760).contains(&epsg) {
            (epsg - 32700, false)
        } else {
            return None;
        };
        Some(Self {
            number: number as u8,
            north,
        })
    }

    pub fn epsg(&self) -> u32 {
        let base = if self.north { 32600 } else { 32700 };
        base + self.number as u32
    }

    /// Zone containing a WGS84 position (no Norway/Svalbard exceptions).
    pub fn for_lonlat(lon: f64, lat: f64) -> Self {
        let number = (((lon + 180.0) / 6.0).floor() as i64).rem_euclid(60) + 1;
        Self {
            number: number as u8,
            north: lat >= 0.0,
        }
    }

    /// Central meridian in degrees.
    pub fn central_meridian(&self) -> f64 {
        (self.number as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    /// (lon, lat) degrees to (easting, northing) metres.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let lon = lon_deg.to_radians();
        let lon0 = self.central_meridian().to_radians();

        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let tan_lat = lat.tan();

        let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = E_PRIME2 * cos_lat * cos_lat;
        let a_coeff = cos_lat * (lon - lon0);
        let m = meridional_arc(lat);

        let a2 = a_coeff * a_coeff;
        let a4 = a2 * a2;
        let a6 = a4 * a2;

        // Snyder eq. 8-9
        let easting = K0
            * n
            * (a_coeff
                + (1.0 - t + c) * a2 * a_coeff / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
            + FALSE_EASTING;

        // Snyder eq. 8-10
        let northing = K0
            * (m + n
                * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

        let northing = if self.north {
            northing
        } else {
            northing + FALSE_NORTHING_SOUTH
        };

        (easting, northing)
    }

    /// (easting, northing) metres to (lon, lat) degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let x = easting - FALSE_EASTING;
        let y = if self.north {
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

        let n1 = A / (1.0 - E2 * sin1 * sin1).sqrt();
        let t1 = tan1 * tan1;
        let c1 = E_PRIME2 * cos1 * cos1;
        let r1 = A * (1.0 - E2) / (1.0 - E2 * sin1 * sin1).powf(1.5);
        let d = x / (n1 * K0);
        let d2 = d * d;
        let d4 = d2 * d2;
        let d6 = d4 * d2;

        // Snyder eq. 8-17 and 8-18
        let lat = phi1
            - (n1 * tan1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1) * d6
                        / 720.0);
        let lon = self.central_meridian().to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1) * d4 * d / 120.0)
                / cos1;

        (lon.to_degrees(), lat.to_degrees())
    }
}

/// Meridional arc from equator to latitude `lat` (radians), Snyder eq. 3-21.
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

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(diff < tol, "{msg}: expected {b}, got {a}, diff {diff} exceeds tolerance {tol}");
    }

    #[test]
    fn parse_epsg() {
        assert_eq!(UtmZone::from_epsg(32630), Some(UtmZone { number: 30, north: true }));
        assert_eq!(UtmZone::from_epsg(32721), Some(UtmZone { number: 21, north: false }));
        assert_eq!(UtmZone::from_epsg(32600), None);
        assert_eq!(UtmZone::from_epsg(32761), None);
        assert_eq!(UtmZone::from_epsg(4326), None);
        assert_eq!(UtmZone::from_epsg(32736).map(|z| z.epsg()), Some(32736));
    }

    #[test]
    fn zone_for_position() {
        assert_eq!(UtmZone::for_lonlat(-3.7, 40.4), UtmZone { number: 30, north: true });
        assert_eq!(UtmZone::for_lonlat(33.0, -1.0), UtmZone { number: 36, north: false });
        assert_eq!(UtmZone::for_lonlat(180.0, 0.0).number, 1);
    }

    // pyproj: Transformer.from_crs(4326, 32630, always_xy=True)
    //   .transform(-3.7037, 40.4168) -> (440298.94, 4474257.31)
    #[test]
    fn madrid_forward() {
        let zone = UtmZone { number: 30, north: true };
        let (e, n) = zone.forward(-3.7037, 40.4168);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    // pyproj: Transformer.from_crs(4326, 32721, always_xy=True)
    //   .transform(-58.3816, -34.6037) -> (373317.50, 6170036.17)
    #[test]
    fn buenos_aires_forward() {
        let zone = UtmZone { number: 21, north: false };
        let (e, n) = zone.forward(-58.3816, -34.6037);
        assert_close(e, 373_317.50, 1.0, "easting");
        assert_close(n, 6_170_036.17, 1.0, "northing");
    }

    #[test]
    fn inverse_recovers_lonlat() {
        for &(lon, lat, epsg) in &[
            (-3.7037, 40.4168, 32630),
            (-58.3816, -34.6037, 32721),
            (36.8219, -1.2921, 32737),
            (30.5, 0.3, 32636),
        ] {
            let zone = UtmZone::from_epsg(epsg).unwrap();
            let (e, n) = zone.forward(lon, lat);
            let (lon2, lat2) = zone.inverse(e, n);
            assert_close(lon2, lon, 1e-6, "lon");
            assert_close(lat2, lat, 1e-6, "lat");
        }
    }

    #[test]
    fn equator_central_meridian() {
        let zone = UtmZone { number: 30, north: true };
        let (e, n) = zone.forward(-3.0, 0.0);
        assert_close(e, 500_000.0, 0.01, "easting at CM");
        assert_close(n, 0.0, 0.01, "northing at equator");
        let (lon, lat) = zone.inverse(500_000.0, 0.0);
        assert_close(lon, -3.0, 1e-9, "lon at CM");
        assert_close(lat, 0.0, 1e-9, "lat at equator");
    }
}
