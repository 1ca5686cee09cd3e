use crate::tile::TileBounds;
use glam::{Mat4, Vec3, Vec4};

/// `normal · p + d = 0`, with `normal` pointing into the frustum
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            normal: Vec3::new(a, b, c),
            d,
        }
    }

    fn from_vec4(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }

    pub fn normalize(&mut self) {
        let len = self.normal.length();
        if len > 0.0 {
            self.normal /= len;
            self.d /= len;
        }
    }

    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Box corner farthest along the normal
    pub fn positive_vertex(&self, min: Vec3, max: Vec3) -> Vec3 {
        Vec3::select(self.normal.cmpge(Vec3::ZERO), max, min)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.d]
    }
}

/// View frustum plus the eye it was built from.
///
/// Visibility contract shared by every culling backend: a box that contains
/// the eye is visible; otherwise it is culled exactly when its positive
/// vertex lies behind some plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6], // Left, right, bottom, top, near, far
    pub eye: Vec3,
}

impl Frustum {
    pub fn new(planes: [Plane; 6], eye: Vec3) -> Self {
        Self { planes, eye }
    }

    /// Extract planes from a view-projection matrix with a 0..1 depth range
    pub fn from_view_projection(view_proj: Mat4, eye: Vec3) -> Self {
        let row0 = view_proj.row(0);
        let row1 = view_proj.row(1);
        let row2 = view_proj.row(2);
        let row3 = view_proj.row(3);

        let mut planes = [
            Plane::from_vec4(row3 + row0),
            Plane::from_vec4(row3 - row0),
            Plane::from_vec4(row3 + row1),
            Plane::from_vec4(row3 - row1),
            Plane::from_vec4(row2),
            Plane::from_vec4(row3 - row2),
        ];

        for plane in &mut planes {
            plane.normalize();
        }

        Self { planes, eye }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Positive-vertex test: false once the box is wholly behind one plane
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(plane.positive_vertex(min, max)) >= 0.0)
    }

    pub fn is_box_visible(&self, bounds: &TileBounds) -> bool {
        bounds.contains_point(self.eye) || self.intersects_aabb(bounds.min, bounds.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        let eye = Vec3::new(0.0, 10.0, 0.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 10.0, -100.0), Vec3::Y);
        let proj = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 1000.0);
        Frustum::from_view_projection(proj * view, eye)
    }

    #[test]
    fn test_box_ahead_is_visible() {
        let frustum = camera_frustum();
        let ahead = TileBounds::new(Vec3::new(-5.0, 5.0, -60.0), Vec3::new(5.0, 15.0, -50.0));
        assert!(frustum.is_box_visible(&ahead));
        assert!(frustum.contains_point(Vec3::new(0.0, 10.0, -50.0)));
    }

    #[test]
    fn test_box_behind_is_culled() {
        let frustum = camera_frustum();
        let behind = TileBounds::new(Vec3::new(-5.0, 5.0, 50.0), Vec3::new(5.0, 15.0, 60.0));
        assert!(!frustum.is_box_visible(&behind));
        let beyond_far = TileBounds::new(Vec3::new(-5.0, 5.0, -2000.0), Vec3::new(5.0, 15.0, -1500.0));
        assert!(!frustum.is_box_visible(&beyond_far));
    }

    #[test]
    fn test_box_around_eye_is_visible() {
        let frustum = camera_frustum();
        // Entirely behind the near plane except for the eye itself
        let around = TileBounds::new(Vec3::new(-1.0, 9.0, -0.05), Vec3::new(1.0, 11.0, 1.0));
        assert!(frustum.is_box_visible(&around));
    }

    #[test]
    fn test_near_plane_faces_forward() {
        let frustum = camera_frustum();
        let near = frustum.planes[4];
        assert!(near.normal.z < -0.99);
        assert!((near.distance_to_point(Vec3::new(0.0, 10.0, -0.1))).abs() < 1e-3);
    }
}
