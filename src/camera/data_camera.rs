/// Data-Oriented Terrain Camera
///
/// Plain data plus free functions. Matrices follow the wgpu convention
/// (right-handed, depth 0..1) so frustum extraction can use the clip-space
/// near plane directly.

use crate::culling::Frustum;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const DEFAULT_FOVY_RADIANS: f32 = std::f32::consts::FRAC_PI_4; // 45 degrees
pub const DEFAULT_ZNEAR: f32 = 0.1;
pub const DEFAULT_ZFAR: f32 = 10_000.0;
/// Keeps the view matrix away from the up-vector singularity
const MAX_PITCH: f32 = 1.55;

/// Camera state as a plain old data structure
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct TerrainCamera {
    pub position: [f32; 3],
    pub yaw_radians: f32,
    pub pitch_radians: f32,
    pub aspect_ratio: f32,
    pub fovy_radians: f32,
    pub znear: f32,
    pub zfar: f32,
    _padding: [f32; 3],
}

/// Camera uniform buffer for GPU
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_matrix: [[f32; 4]; 4],
    pub projection_matrix: [[f32; 4]; 4],
    pub view_projection_matrix: [[f32; 4]; 4],
    pub position: [f32; 3],
    _padding: f32,
}

/// Camera above the origin looking along -z
pub fn init_camera(width: u32, height: u32) -> TerrainCamera {
    init_camera_at(Vec3::new(0.0, 300.0, 0.0), width, height)
}

pub fn init_camera_at(position: Vec3, width: u32, height: u32) -> TerrainCamera {
    TerrainCamera {
        position: position.to_array(),
        yaw_radians: -std::f32::consts::FRAC_PI_2,
        pitch_radians: 0.0,
        aspect_ratio: aspect(width, height),
        fovy_radians: DEFAULT_FOVY_RADIANS,
        znear: DEFAULT_ZNEAR,
        zfar: DEFAULT_ZFAR,
        _padding: [0.0; 3],
    }
}

fn aspect(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

/// Update camera aspect ratio for viewport resize
pub fn update_aspect_ratio(camera: &TerrainCamera, width: u32, height: u32) -> TerrainCamera {
    let mut updated = *camera;
    updated.aspect_ratio = aspect(width, height);
    updated
}

pub fn camera_position(camera: &TerrainCamera) -> Vec3 {
    Vec3::from_array(camera.position)
}

/// Calculate forward vector from camera orientation
pub fn calculate_forward_vector(yaw_rad: f32, pitch_rad: f32) -> Vec3 {
    let (sin_yaw, cos_yaw) = yaw_rad.sin_cos();
    let (sin_pitch, cos_pitch) = pitch_rad.sin_cos();

    Vec3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw)
}

pub fn build_view_matrix(camera: &TerrainCamera) -> Mat4 {
    let position = camera_position(camera);
    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    Mat4::look_at_rh(position, position + forward, Vec3::Y)
}

pub fn build_projection_matrix(camera: &TerrainCamera) -> Mat4 {
    Mat4::perspective_rh(
        camera.fovy_radians,
        camera.aspect_ratio,
        camera.znear,
        camera.zfar,
    )
}

pub fn build_view_projection_matrix(camera: &TerrainCamera) -> Mat4 {
    build_projection_matrix(camera) * build_view_matrix(camera)
}

pub fn build_frustum(camera: &TerrainCamera) -> Frustum {
    Frustum::from_view_projection(build_view_projection_matrix(camera), camera_position(camera))
}

/// Build camera uniform buffer for GPU
pub fn build_camera_uniform(camera: &TerrainCamera) -> CameraUniform {
    let view = build_view_matrix(camera);
    let proj = build_projection_matrix(camera);

    CameraUniform {
        view_matrix: view.to_cols_array_2d(),
        projection_matrix: proj.to_cols_array_2d(),
        view_projection_matrix: (proj * view).to_cols_array_2d(),
        position: camera.position,
        _padding: 0.0,
    }
}

/// Camera movement transformations (returns new camera data)
pub mod transform {
    use super::*;

    pub fn move_forward(camera: &TerrainCamera, amount: f32) -> TerrainCamera {
        let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
        translate(camera, forward * amount)
    }

    pub fn translate(camera: &TerrainCamera, offset: Vec3) -> TerrainCamera {
        let mut updated = *camera;
        updated.position = (camera_position(camera) + offset).to_array();
        updated
    }

    pub fn rotate(camera: &TerrainCamera, delta_yaw: f32, delta_pitch: f32) -> TerrainCamera {
        let mut updated = *camera;
        updated.yaw_radians += delta_yaw;
        updated.pitch_radians = (camera.pitch_radians + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
        updated
    }

    /// Orient the camera toward `target`
    pub fn look_at(camera: &TerrainCamera, target: Vec3) -> TerrainCamera {
        let direction = (target - camera_position(camera)).normalize_or_zero();
        if direction == Vec3::ZERO {
            return *camera;
        }
        let mut updated = *camera;
        updated.yaw_radians = direction.z.atan2(direction.x);
        updated.pitch_radians = direction.y.asin().clamp(-MAX_PITCH, MAX_PITCH);
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera_looks_down_negative_z() {
        let camera = init_camera(800, 600);
        let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
        assert!((forward - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
        assert!((camera.aspect_ratio - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_frustum_sees_ahead_only() {
        let camera = init_camera(800, 600);
        let frustum = build_frustum(&camera);
        assert!(frustum.contains_point(Vec3::new(0.0, 300.0, -100.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 300.0, 100.0)));
        assert_eq!(frustum.eye, Vec3::new(0.0, 300.0, 0.0));
    }

    #[test]
    fn test_look_at_and_pitch_clamp() {
        let camera = init_camera(100, 100);
        let turned = transform::look_at(&camera, Vec3::new(100.0, 300.0, 0.0));
        let forward = calculate_forward_vector(turned.yaw_radians, turned.pitch_radians);
        assert!((forward - Vec3::X).length() < 1e-5);

        let steep = transform::rotate(&camera, 0.0, 10.0);
        assert!(steep.pitch_radians <= 1.55);
        let moved = transform::move_forward(&camera, 10.0);
        assert!((moved.position[2] + 10.0).abs() < 1e-4);
    }
}
