//! Lambert cylindrical equal-area on the WGS84 ellipsoid, standard parallel
//! 30°, as used by EPSG:6933 (Snyder 1987, pp. 76-85).

use super::wgs84::{A, E2};

const STANDARD_PARALLEL_DEG: f64 = 30.0;

fn e() -> f64 {
    E2.sqrt()
}

/// Scale along the standard parallel.
fn k0() -> f64 {
    let phi_s = STANDARD_PARALLEL_DEG.to_radians();
    phi_s.cos() / (1.0 - E2 * phi_s.sin().powi(2)).sqrt()
}

/// Authalic q, Snyder eq. 3-12.
fn q(phi: f64) -> f64 {
    let s = phi.sin();
    let e = e();
    (1.0 - E2) * (s / (1.0 - E2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

pub(super) fn forward(lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let k0 = k0();
    let x = A * k0 * lon_deg.to_radians();
    let y = A * q(lat_deg.to_radians()) / (2.0 * k0);
    (x, y)
}

pub(super) fn inverse(x: f64, y: f64) -> (f64, f64) {
    let k0 = k0();
    let qp = q(std::f64::consts::FRAC_PI_2);
    let beta = (2.0 * y * k0 / (A * qp)).clamp(-1.0, 1.0).asin();

    // Authalic to geodetic latitude, Snyder eq. 3-18
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let phi = beta
        + (E2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
        + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
        + (761.0 * e6 / 45360.0) * (6.0 * beta).sin();

    let lon = x / (A * k0);
    (lon.to_degrees(), phi.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn origin_maps_to_zero() {
        let (x, y) = forward(0.0, 0.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn roundtrip() {
        for &(lon, lat) in &[(-3.7, 40.4), (36.8, -1.3), (-58.4, -34.6), (120.0, 75.0)] {
            let (x, y) = forward(lon, lat);
            let (lon2, lat2) = inverse(x, y);
            assert_relative_eq!(lon2, lon, epsilon = 1e-9);
            assert_relative_eq!(lat2, lat, epsilon = 1e-6);
        }
    }

    #[test]
    fn one_degree_cell_area_at_equator() {
        let (x0, y0) = forward(0.0, 0.0);
        let (x1, y1) = forward(1.0, 1.0);
        let area_km2 = (x1 - x0) * (y1 - y0) / 1e6;
        // WGS84 1°x1° cell at the equator is about 12 309 km²
        assert!((area_km2 - 12_309.0).abs() / 12_309.0 < 0.01, "area {area_km2}");
    }
}
