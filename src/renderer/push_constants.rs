/// Per-draw push constants for the terrain patch pipeline
///
/// Packed as 16-byte rows so the layout matches std430 without implicit
/// padding and stays inside the 256-byte push constant budget.
use super::TerrainRenderConfig;
use crate::camera::{build_view_projection_matrix, TerrainCamera};
use crate::tile::TileBounds;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

pub const MAX_PUSH_CONSTANT_SIZE: usize = 256;

const WIREFRAME_COLOR: [f32; 3] = [1.0, 1.0, 0.0];
const WIREFRAME_OPACITY: f32 = 0.8;

/// Debug shading selected alongside the wireframe pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum VisualizationMode {
    #[default]
    Shaded = 0,
    TessellationLevel = 1,
    Distance = 2,
    Normals = 3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TerrainPushConstants {
    pub mvp_matrix: [[f32; 4]; 4],
    /// xyz camera position, w tessellation scale
    pub camera_position: [f32; 4],
    /// Tile footprint: min x, min z, size x, size z
    pub tile_rect: [f32; 4],
    /// height scale, time, near distance, far distance
    pub terrain: [f32; 4],
    /// min tess, max tess, roughness, metallic
    pub tessellation: [f32; 4],
    /// xyz normalized sun direction
    pub sun_direction: [f32; 4],
    pub sun_color: [f32; 4],
    pub ambient_color: [f32; 4],
    /// xyz fog color, w density
    pub fog_color: [f32; 4],
    /// fog start, fog end, wireframe opacity, visualization mode bits
    pub fog_range: [f32; 4],
    /// xyz wireframe color, w 1 when wireframe is enabled
    pub wireframe: [f32; 4],
}

impl TerrainPushConstants {
    pub fn new(
        camera: &TerrainCamera,
        config: &TerrainRenderConfig,
        bounds: &TileBounds,
        time: f32,
        mode: VisualizationMode,
    ) -> Self {
        let position = camera.position;
        let size = bounds.size();
        let sun = Vec3::from_array(config.sun_direction).normalize_or_zero();
        let rgb = |c: [f32; 3], w: f32| [c[0], c[1], c[2], w];
        let wireframe = if config.enable_wireframe { 1.0 } else { 0.0 };
        let mode = if config.enable_wireframe {
            mode
        } else {
            VisualizationMode::Shaded
        };

        Self {
            mvp_matrix: build_view_projection_matrix(camera).to_cols_array_2d(),
            camera_position: rgb(position, config.tessellation_scale),
            tile_rect: [bounds.min.x, bounds.min.z, size.x, size.z],
            terrain: [
                config.height_scale,
                time,
                config.near_distance,
                config.far_distance,
            ],
            tessellation: [
                config.min_tess_level,
                config.max_tess_level,
                config.roughness,
                config.metallic,
            ],
            sun_direction: sun.extend(0.0).to_array(),
            sun_color: rgb(config.sun_color, 0.0),
            ambient_color: rgb(config.ambient_color, 0.0),
            fog_color: rgb(config.fog_color, config.fog_density),
            fog_range: [
                config.fog_start,
                config.fog_end,
                WIREFRAME_OPACITY * wireframe,
                f32::from_bits(mode as u32),
            ],
            wireframe: rgb(WIREFRAME_COLOR, wireframe),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::init_camera;

    #[test]
    fn test_fits_push_constant_budget() {
        assert_eq!(std::mem::size_of::<TerrainPushConstants>(), 224);
        assert!(std::mem::size_of::<TerrainPushConstants>() <= MAX_PUSH_CONSTANT_SIZE);
        assert_eq!(std::mem::size_of::<TerrainPushConstants>() % 16, 0);
    }

    #[test]
    fn test_carries_tile_and_config() {
        let camera = init_camera(800, 600);
        let config = TerrainRenderConfig {
            enable_wireframe: true,
            ..Default::default()
        };
        let bounds = TileBounds::new(Vec3::new(100.0, 0.0, 200.0), Vec3::new(612.0, 50.0, 712.0));
        let pc = TerrainPushConstants::new(
            &camera,
            &config,
            &bounds,
            1.5,
            VisualizationMode::Distance,
        );

        assert_eq!(pc.tile_rect, [100.0, 200.0, 512.0, 512.0]);
        assert_eq!(pc.terrain[1], 1.5);
        assert_eq!(pc.wireframe[3], 1.0);
        assert_eq!(pc.fog_range[3].to_bits(), VisualizationMode::Distance as u32);
        let sun = Vec3::from_slice(&pc.sun_direction[..3]);
        assert!((sun.length() - 1.0).abs() < 1e-5);
        assert_eq!(pc.as_bytes().len(), 224);
    }
}
