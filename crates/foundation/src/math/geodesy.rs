/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;

/// Meters spanned by one degree of arc along the equator.
pub const METERS_PER_DEGREE: f64 = WGS84_A * std::f64::consts::PI / 180.0;

/// Convert a north/south distance in meters to degrees of latitude.
pub fn meters_to_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Convert an east/west distance in meters to degrees of longitude at `at_lat`.
///
/// Returns 0 at the poles, where longitude is degenerate.
pub fn meters_to_lon(meters: f64, at_lat: f64) -> f64 {
    if at_lat.abs() >= 90.0 {
        return 0.0;
    }
    meters / (METERS_PER_DEGREE * at_lat.to_radians().cos().abs())
}

#[cfg(test)]
mod tests {
    use super::{METERS_PER_DEGREE, meters_to_lat, meters_to_lon};

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn one_degree_of_latitude() {
        assert_close(meters_to_lat(METERS_PER_DEGREE), 1.0, 1e-12);
    }

    #[test]
    fn longitude_stretches_with_latitude() {
        assert_close(meters_to_lon(METERS_PER_DEGREE, 0.0), 1.0, 1e-12);
        assert_close(meters_to_lon(METERS_PER_DEGREE, 60.0), 2.0, 1e-9);
        assert_eq!(meters_to_lon(1000.0, 90.0), 0.0);
    }
}
