//! Footprints, coverage and read windows
//!
//! Footprints are geographic multipolygons. Coverage is measured in the
//! EPSG:6933 equal-area projection so that areas are comparable at every
//! latitude.

use geo::{Area, BooleanOps, BoundingRect};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{json, Value};

use clearsky_core::crs::{transform_bbox, transform_polygon, Projection};
use clearsky_core::BBox;

/// Parse a GeoJSON `Polygon`, `MultiPolygon`, `Feature` or the first
/// feature of a `FeatureCollection`.
pub fn parse_geometry(value: &Value) -> Option<MultiPolygon<f64>> {
    match value.get("type")?.as_str()? {
        "Polygon" => Some(MultiPolygon::new(vec![parse_polygon(value.get("coordinates")?)?])),
        "MultiPolygon" => value
            .get("coordinates")?
            .as_array()?
            .iter()
            .map(parse_polygon)
            .collect::<Option<Vec<_>>>()
            .map(MultiPolygon::new),
        "Feature" => parse_geometry(value.get("geometry")?),
        "FeatureCollection" => parse_geometry(value.get("features")?.as_array()?.first()?),
        _ => None,
    }
}

fn parse_ring(value: &Value) -> Option<LineString<f64>> {
    value
        .as_array()?
        .iter()
        .map(|p| {
            let xy = p.as_array()?;
            Some(Coord {
                x: xy.first()?.as_f64()?,
                y: xy.get(1)?.as_f64()?,
            })
        })
        .collect::<Option<Vec<_>>>()
        .map(LineString::from)
}

fn parse_polygon(value: &Value) -> Option<Polygon<f64>> {
    let mut rings = value.as_array()?.iter().map(parse_ring);
    let exterior = rings.next()??;
    let interiors = rings.collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(exterior, interiors))
}

/// GeoJSON `MultiPolygon` (or `Polygon` for a single part)
pub fn to_geojson(geometry: &MultiPolygon<f64>) -> Value {
    let ring = |ls: &LineString<f64>| -> Value { ls.coords().map(|c| json!([c.x, c.y])).collect() };
    let polygon = |p: &Polygon<f64>| -> Value {
        std::iter::once(p.exterior())
            .chain(p.interiors())
            .map(ring)
            .collect()
    };
    match geometry.0.as_slice() {
        [single] => json!({ "type": "Polygon", "coordinates": polygon(single) }),
        parts => json!({
            "type": "MultiPolygon",
            "coordinates": parts.iter().map(polygon).collect::<Vec<_>>(),
        }),
    }
}

/// Envelope of a geometry as a bbox
pub fn envelope(geometry: &MultiPolygon<f64>) -> Option<BBox> {
    let rect = geometry.bounding_rect()?;
    BBox::try_new(rect.min().x, rect.min().y, rect.max().x, rect.max().y).ok()
}

fn to_equal_area(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geometry
            .0
            .iter()
            .map(|p| transform_polygon(p, &Projection::Geographic, &Projection::EqualArea))
            .collect(),
    )
}

/// Percentage of `bbox` covered by the union of `footprints`, rounded to
/// the nearest integer.
pub fn coverage_percent(footprints: &[MultiPolygon<f64>], bbox: &BBox) -> u32 {
    let target = to_equal_area(&MultiPolygon::new(vec![bbox.to_polygon()]));
    let total = target.unsigned_area();
    if total <= 0.0 {
        return 0;
    }
    let union = footprints
        .iter()
        .map(to_equal_area)
        .fold(MultiPolygon::new(Vec::new()), |acc, fp| acc.union(&fp));
    let covered = union.intersection(&target).unsigned_area();
    ((covered / total) * 100.0).round() as u32
}

/// Read window of a scene in its UTM projection.
///
/// The part of `bbox` inside `footprint` is reprojected to `utm`, snapped
/// outward to multiples of `snap` metres and grown by one more step, so
/// every analysis pixel centre inside the overlap has a source sample.
/// `None` when the footprint misses the bbox.
pub fn scene_window(bbox: &BBox, footprint: &MultiPolygon<f64>, utm: &Projection, snap: f64) -> Option<BBox> {
    let overlap = footprint.intersection(&MultiPolygon::new(vec![bbox.to_polygon()]));
    let overlap = envelope(&overlap)?;
    let w = transform_bbox(&overlap, &Projection::Geographic, utm);
    let window = BBox::new(
        (w.min_x / snap).floor() * snap - snap,
        (w.min_y / snap).floor() * snap - snap,
        (w.max_x / snap).ceil() * snap + snap,
        (w.max_y / snap).ceil() * snap + snap,
    );
    window.is_valid().then_some(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![BBox::new(min_x, min_y, max_x, max_y).to_polygon()])
    }

    #[test]
    fn test_parse_feature_collection_and_polygon() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[36.8, -1.3], [36.9, -1.3], [36.9, -1.2], [36.8, -1.2], [36.8, -1.3]]]
        });
        let fc = json!({
            "type": "FeatureCollection",
            "features": [{ "type": "Feature", "properties": {}, "geometry": polygon.clone() }]
        });
        let a = parse_geometry(&polygon).unwrap();
        let b = parse_geometry(&fc).unwrap();
        assert_eq!(a, b);
        let bbox = envelope(&a).unwrap();
        assert!(bbox.approx_eq(&BBox::new(36.8, -1.3, 36.9, -1.2), 1e-12));
        assert!(parse_geometry(&json!({ "type": "Point", "coordinates": [0.0, 0.0] })).is_none());
    }

    #[test]
    fn test_geojson_round_trip() {
        let g = square(10.0, 20.0, 11.0, 21.0);
        assert_eq!(parse_geometry(&to_geojson(&g)).unwrap(), g);
    }

    #[test]
    fn test_full_and_partial_coverage() {
        let bbox = BBox::new(36.80, -1.30, 36.82, -1.28);
        assert_eq!(coverage_percent(&[square(36.7, -1.4, 36.9, -1.2)], &bbox), 100);
        // Two halves meeting in the middle
        let halves = [square(36.7, -1.4, 36.81, -1.2), square(36.81, -1.4, 36.9, -1.2)];
        assert_eq!(coverage_percent(&halves, &bbox), 100);
        // A gap: only the western half
        assert_eq!(coverage_percent(&halves[..1], &bbox), 50);
        assert_eq!(coverage_percent(&[], &bbox), 0);
    }

    #[test]
    fn test_equal_area_round_trip() {
        let bbox = BBox::new(36.80, -1.30, 36.82, -1.28);
        let ea = transform_bbox(&bbox, &Projection::Geographic, &Projection::EqualArea);
        let back = transform_bbox(&ea, &Projection::EqualArea, &Projection::Geographic);
        assert!(back.approx_eq(&bbox, 1e-6));
    }

    #[test]
    fn test_scene_window_is_snapped() {
        let utm = Projection::from_epsg(32737).unwrap();
        let bbox = BBox::new(36.80, -1.30, 36.82, -1.28);
        let window = scene_window(&bbox, &square(36.81, -1.4, 37.0, -1.2), &utm, 10.0).unwrap();
        for v in window.as_array() {
            assert_relative_eq!(v / 10.0, (v / 10.0).round(), epsilon = 1e-9);
        }
        // Only the eastern half of the bbox is read: about 1.1 km wide
        assert!(window.width() > 1000.0 && window.width() < 1200.0);
        assert!(scene_window(&bbox, &square(40.0, 0.0, 41.0, 1.0), &utm, 10.0).is_none());
    }
}
