use super::TileCoordinate;
use glam::Vec3;

/// Axis-aligned world box plus the elevation range it was built from.
/// `min <= max` holds componentwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub min_elevation: f32,
    pub max_elevation: f32,
}

impl Default for TileBounds {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

impl TileBounds {
    /// Box spanning two corners in any order
    pub fn new(a: Vec3, b: Vec3) -> Self {
        let min = a.min(b);
        let max = a.max(b);
        Self {
            min,
            max,
            min_elevation: min.y,
            max_elevation: max.y,
        }
    }

    /// Footprint of a tile on the x/z plane with the given elevation range
    pub fn for_coordinate(
        coord: &TileCoordinate,
        tile_size: f32,
        min_elevation: f32,
        max_elevation: f32,
    ) -> Self {
        let edge = TileCoordinate::edge_length(coord.level, tile_size);
        let origin = Vec3::new(coord.x as f32 * edge, min_elevation, coord.y as f32 * edge);
        Self::new(
            origin,
            Vec3::new(origin.x + edge, max_elevation, origin.z + edge),
        )
    }

    pub fn with_elevation(mut self, min_elevation: f32, max_elevation: f32) -> Self {
        let (lo, hi) = if min_elevation <= max_elevation {
            (min_elevation, max_elevation)
        } else {
            (max_elevation, min_elevation)
        };
        self.min.y = lo;
        self.max.y = hi;
        self.min_elevation = lo;
        self.max_elevation = hi;
        self
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Half-extents along each axis
    pub fn extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Radius of the bounding sphere
    pub fn radius(&self) -> f32 {
        self.extents().length()
    }

    pub fn intersects(&self, other: &TileBounds) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Overlap test on the x/z plane only
    pub fn intersects_xz(&self, other: &TileBounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn contains(&self, other: &TileBounds) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn union(&self, other: &TileBounds) -> TileBounds {
        TileBounds::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Distance from `point` to the nearest point of the box, 0 inside
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        let closest = point.clamp(self.min, self.max);
        closest.distance(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_orders_corners() {
        let bounds = TileBounds::new(Vec3::new(5.0, 1.0, -2.0), Vec3::new(-5.0, 3.0, 2.0));
        assert_eq!(bounds.min, Vec3::new(-5.0, 1.0, -2.0));
        assert_eq!(bounds.max, Vec3::new(5.0, 3.0, 2.0));
        assert_eq!(bounds.min_elevation, 1.0);
        assert_eq!(bounds.max_elevation, 3.0);
    }

    #[test]
    fn test_for_coordinate_scales_with_level() {
        let coord = TileCoordinate::new(-1, 2, 1, "dem");
        let bounds = TileBounds::for_coordinate(&coord, 100.0, 0.0, 50.0);
        assert_eq!(bounds.min, Vec3::new(-200.0, 0.0, 400.0));
        assert_eq!(bounds.max, Vec3::new(0.0, 50.0, 600.0));
        assert_eq!(bounds.center(), Vec3::new(-100.0, 25.0, 500.0));
    }

    #[test]
    fn test_intersection_and_containment() {
        let a = TileBounds::new(Vec3::ZERO, Vec3::splat(10.0));
        let b = TileBounds::new(Vec3::splat(5.0), Vec3::splat(15.0));
        let c = TileBounds::new(Vec3::splat(20.0), Vec3::splat(30.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains(&TileBounds::new(Vec3::splat(1.0), Vec3::splat(2.0))));
        assert!(!a.contains(&b));
        assert_eq!(a.union(&c).max, Vec3::splat(30.0));
    }

    #[test]
    fn test_distance_to_point() {
        let bounds = TileBounds::new(Vec3::ZERO, Vec3::splat(10.0));
        assert_eq!(bounds.distance_to_point(Vec3::splat(5.0)), 0.0);
        assert_eq!(bounds.distance_to_point(Vec3::new(13.0, 5.0, 5.0)), 3.0);
        assert!((bounds.radius() - (75.0f32).sqrt()).abs() < 1e-4);
    }
}
