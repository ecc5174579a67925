use crate::math::geodesy::{meters_to_lat, meters_to_lon};

/// Axis-aligned bounding box in 2D.
///
/// For geographic boxes `x` is longitude and `y` is latitude, both in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    /// Degenerate box covering a single point.
    pub fn point(p: [f64; 2]) -> Self {
        Aabb2 { min: p, max: p }
    }

    /// Box spanning two arbitrary opposite corners.
    pub fn from_corners(a: [f64; 2], b: [f64; 2]) -> Self {
        Aabb2 {
            min: [a[0].min(b[0]), a[1].min(b[1])],
            max: [a[0].max(b[0]), a[1].max(b[1])],
        }
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ]
    }

    /// Closed-interval overlap test; touching edges count as intersecting.
    pub fn intersects(&self, other: &Aabb2) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }

    pub fn contains_point(&self, p: [f64; 2]) -> bool {
        p[0] >= self.min[0] && p[0] <= self.max[0] && p[1] >= self.min[1] && p[1] <= self.max[1]
    }

    pub fn union(&self, other: &Aabb2) -> Aabb2 {
        Aabb2::new(
            [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        )
    }

    /// Grow a geographic box by `meters` on every side.
    ///
    /// The longitude pad is computed at the box's center latitude.
    pub fn pad_by_meters(&self, meters: f64) -> Aabb2 {
        let d_lat = meters_to_lat(meters);
        let d_lon = meters_to_lon(meters, self.center()[1]);
        Aabb2::new(
            [self.min[0] - d_lon, self.min[1] - d_lat],
            [self.max[0] + d_lon, self.max[1] + d_lat],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb2;

    #[test]
    fn from_corners_normalizes_order() {
        let b = Aabb2::from_corners([10.0, -5.0], [2.0, 7.0]);
        assert_eq!(b.min, [2.0, -5.0]);
        assert_eq!(b.max, [10.0, 7.0]);
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = Aabb2::new([0.0, 0.0], [1.0, 1.0]);
        let b = Aabb2::new([1.0, 1.0], [2.0, 2.0]);
        let c = Aabb2::new([1.5, 1.5], [2.0, 2.0]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(Aabb2::point([1.0, 0.5]).intersects(&a));
    }

    #[test]
    fn pad_by_meters_grows_symmetrically() {
        let b = Aabb2::point([13.4, 52.5]).pad_by_meters(1000.0);
        assert!(b.contains_point([13.4, 52.5]));
        assert!((b.height() - 2.0 * 1000.0 / 111_319.49).abs() < 1e-4);
        // Longitude degrees are shorter away from the equator.
        assert!(b.width() > b.height());
    }
}
