//! Coordinate Reference System handling
//!
//! The pipeline only ever touches three families of CRS: WGS84 geographic
//! (the analysis grid), UTM north/south (Sentinel-2 native tiles) and the
//! EPSG:6933 global equal-area grid used to measure coverage. All three are
//! implemented in pure Rust in [`projection`].

mod equal_area;
mod projection;
mod utm;

mod wgs84 {
    pub const A: f64 = 6_378_137.0;
    pub const F: f64 = 1.0 / 298.257_223_563;
    pub const E2: f64 = 2.0 * F - F * F;
}

pub use projection::{transform_bbox, transform_point, transform_polygon, Projection};
pub use utm::UtmZone;

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of WGS84 geographic coordinates.
pub const EPSG_WGS84: u32 = 4326;
/// EPSG code of the WGS84 / NSIDC EASE-Grid 2.0 Global equal-area projection.
pub const EPSG_EQUAL_AREA: u32 = 6933;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation, when read from a file without an EPSG key
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(EPSG_WGS84)
    }

    /// Equal-area CRS used for coverage computations (EPSG:6933)
    pub fn equal_area() -> Self {
        Self::from_epsg(EPSG_EQUAL_AREA)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        self.epsg == Some(EPSG_WGS84)
    }

    /// Resolve the projection math for this CRS.
    pub fn projection(&self) -> crate::Result<Projection> {
        match self.epsg {
            Some(code) => Projection::from_epsg(code),
            None => Err(crate::Error::Other(format!(
                "CRS {} has no EPSG code",
                self.identifier()
            ))),
        }
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }

        // WKT comparison is textual only
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }

        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", wkt.chars().take(50).collect::<String>());
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Ground metres spanned by one degree of `(longitude, latitude)` at
/// latitude `lat` on the WGS84 ellipsoid.
pub fn metres_per_degree(lat: f64) -> (f64, f64) {
    let phi = lat.to_radians();
    let w = 1.0 - wgs84::E2 * phi.sin().powi(2);
    let prime_vertical = wgs84::A / w.sqrt();
    let meridional = wgs84::A * (1.0 - wgs84::E2) / w.powf(1.5);
    let per_degree = std::f64::consts::PI / 180.0;
    (prime_vertical * phi.cos() * per_degree, meridional * per_degree)
}
