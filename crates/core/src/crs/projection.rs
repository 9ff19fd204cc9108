//! Forward/inverse projection dispatch and geometry reprojection.

use super::{equal_area, utm::UtmZone, EPSG_EQUAL_AREA, EPSG_WGS84};
use crate::bbox::BBox;
use crate::error::{Error, Result};
use geo_types::{Coord, LineString, Polygon};

/// Points sampled along each bbox edge when reprojecting an envelope.
const EDGE_SAMPLES: usize = 8;

/// A supported map projection. All variants share the WGS84 datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Longitude/latitude degrees (EPSG:4326)
    Geographic,
    /// UTM metres (EPSG:326xx / 327xx)
    Utm(UtmZone),
    /// Global equal-area metres (EPSG:6933)
    EqualArea,
}

impl Projection {
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            EPSG_WGS84 => Ok(Self::Geographic),
            EPSG_EQUAL_AREA => Ok(Self::EqualArea),
            _ => UtmZone::from_epsg(code)
                .map(Self::Utm)
                .ok_or(Error::UnsupportedCrs(code)),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Self::Geographic => EPSG_WGS84,
            Self::Utm(zone) => zone.epsg(),
            Self::EqualArea => EPSG_EQUAL_AREA,
        }
    }

    /// (lon, lat) degrees to projected coordinates.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (lon, lat),
            Self::Utm(zone) => zone.forward(lon, lat),
            Self::EqualArea => equal_area::forward(lon, lat),
        }
    }

    /// Projected coordinates to (lon, lat) degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (x, y),
            Self::Utm(zone) => zone.inverse(x, y),
            Self::EqualArea => equal_area::inverse(x, y),
        }
    }
}

/// Reproject one point between projections.
pub fn transform_point(from: &Projection, to: &Projection, x: f64, y: f64) -> (f64, f64) {
    if from == to {
        return (x, y);
    }
    let (lon, lat) = from.inverse(x, y);
    to.forward(lon, lat)
}

/// Reproject a bbox and return the envelope of the result.
///
/// Corners and evenly spaced edge points are transformed, which bounds the
/// curvature of UTM edges far better than transforming min/max only.
pub fn transform_bbox(bbox: &BBox, from: &Projection, to: &Projection) -> BBox {
    if from == to {
        return *bbox;
    }
    let mut points = Vec::with_capacity(4 * (EDGE_SAMPLES + 1));
    let corners = bbox.corners();
    for i in 0..4 {
        let (x0, y0) = corners[i];
        let (x1, y1) = corners[(i + 1) % 4];
        for s in 0..=EDGE_SAMPLES {
            let t = s as f64 / EDGE_SAMPLES as f64;
            points.push(transform_point(from, to, x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
        }
    }
    // Non-empty by construction
    BBox::enclosing(points).unwrap_or(*bbox)
}

/// Reproject every vertex of a polygon, interiors included.
pub fn transform_polygon(polygon: &Polygon<f64>, from: &Projection, to: &Projection) -> Polygon<f64> {
    let ring = |ls: &LineString<f64>| -> LineString<f64> {
        ls.coords()
            .map(|c| {
                let (x, y) = transform_point(from, to, c.x, c.y);
                Coord { x, y }
            })
            .collect::<Vec<_>>()
            .into()
    };
    Polygon::new(
        ring(polygon.exterior()),
        polygon.interiors().iter().map(ring).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epsg() {
        assert_eq!(Projection::from_epsg(4326).unwrap(), Projection::Geographic);
        assert_eq!(Projection::from_epsg(6933).unwrap(), Projection::EqualArea);
        assert_eq!(Projection::from_epsg(32630).unwrap().epsg(), 32630);
        assert!(matches!(Projection::from_epsg(3857), Err(Error::UnsupportedCrs(3857))));
    }

    #[test]
    fn test_bbox_equal_area_roundtrip() {
        let bbox = BBox::new(36.80, -1.32, 36.84, -1.28);
        let ea = transform_bbox(&bbox, &Projection::Geographic, &Projection::EqualArea);
        let back = transform_bbox(&ea, &Projection::EqualArea, &Projection::Geographic);
        assert!(back.approx_eq(&bbox, 1e-7), "{back} vs {bbox}");
    }

    #[test]
    fn test_bbox_to_utm_is_metric() {
        let bbox = BBox::new(-3.75, 40.40, -3.70, 40.45);
        let utm = Projection::from_epsg(32630).unwrap();
        let result = transform_bbox(&bbox, &Projection::Geographic, &utm);

        assert!(result.min_x > 100_000.0, "easting should be in metres");
        assert!(result.min_y > 4_000_000.0, "northing should be in metres");
        // 0.05° lon at 40°N ≈ 4.3 km, 0.05° lat ≈ 5.5 km
        assert!(result.width() > 3_000.0 && result.width() < 6_000.0);
        assert!(result.height() > 4_000.0 && result.height() < 7_000.0);
    }

    #[test]
    fn test_identity_transform() {
        let bbox = BBox::new(-3.75, 40.40, -3.70, 40.45);
        let same = transform_bbox(&bbox, &Projection::Geographic, &Projection::Geographic);
        assert_eq!(same, bbox);
    }

    #[test]
    fn test_polygon_utm_roundtrip() {
        let utm = Projection::from_epsg(32737).unwrap();
        let poly = BBox::new(36.80, -1.32, 36.84, -1.28).to_polygon();
        let projected = transform_polygon(&poly, &Projection::Geographic, &utm);
        let back = transform_polygon(&projected, &utm, &Projection::Geographic);
        for (a, b) in poly.exterior().coords().zip(back.exterior().coords()) {
            assert!((a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6);
        }
    }
}
