/// Camera Module
///
/// Data-oriented terrain camera: a POD state struct and free functions that
/// build matrices, the culling frustum and the GPU uniform.

pub mod data_camera;

pub use data_camera::{
    build_camera_uniform, build_frustum, build_projection_matrix, build_view_matrix,
    build_view_projection_matrix, calculate_forward_vector, camera_position, init_camera,
    init_camera_at, transform, update_aspect_ratio, CameraUniform, TerrainCamera,
    DEFAULT_FOVY_RADIANS, DEFAULT_ZFAR, DEFAULT_ZNEAR,
};
