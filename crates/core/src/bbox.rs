//! Axis-aligned bounding boxes in any CRS.

use crate::error::{Error, Result};
use geo_types::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)`.
///
/// For geographic boxes `x` is longitude and `y` is latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Build a box and reject inverted or non-finite extents.
    pub fn try_new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        let bbox = Self::new(min_x, min_y, max_x, max_y);
        if !bbox.is_valid() {
            return Err(Error::InvalidParameter {
                name: "bbox",
                value: format!("{bbox}"),
                reason: "min must be below max and all bounds finite".into(),
            });
        }
        Ok(bbox)
    }

    /// Smallest box enclosing every point, `None` if the iterator is empty.
    pub fn enclosing(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            })
        })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite()) && self.min_x < self.max_x && self.min_y < self.max_y
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Corners in order SW, SE, NE, NW.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x && self.max_x > other.min_x && self.min_y < other.max_y && self.max_y > other.min_y
    }

    /// Overlap of two boxes, `None` when they share no area.
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn contains(&self, other: &BBox) -> bool {
        self.min_x <= other.min_x && self.min_y <= other.min_y && self.max_x >= other.max_x && self.max_y >= other.max_y
    }

    /// Compare bounds with an absolute tolerance.
    pub fn approx_eq(&self, other: &BBox, tol: f64) -> bool {
        self.as_array()
            .iter()
            .zip(other.as_array().iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Closed exterior ring as a polygon.
    pub fn to_polygon(&self) -> Polygon<f64> {
        let mut ring: Vec<Coord<f64>> = self.corners().iter().map(|&(x, y)| Coord { x, y }).collect();
        ring.push(ring[0]);
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Envelope of a polygon's exterior ring.
    pub fn from_polygon(polygon: &Polygon<f64>) -> Option<BBox> {
        BBox::enclosing(polygon.exterior().coords().map(|c| (c.x, c.y)))
    }
}

impl From<(f64, f64, f64, f64)> for BBox {
    fn from(b: (f64, f64, f64, f64)) -> Self {
        BBox::new(b.0, b.1, b.2, b.3)
    }
}

impl std::fmt::Display for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}
