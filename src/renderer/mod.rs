/// Terrain Renderer
///
/// Per-frame orchestration over the tile manager, culling and the GPU
/// command layer, plus the configuration, statistics and push constants
/// it produces.

pub mod config;
pub mod error;
pub mod push_constants;
pub mod scene;
pub mod stats;
pub mod terrain_renderer;

pub use config::{TerrainRenderConfig, MAX_TESSELLATION_LEVEL};
pub use error::{
    dataset_not_found_error, invalid_config_error, RendererErrorContext, RendererResult,
};
pub use push_constants::{TerrainPushConstants, VisualizationMode, MAX_PUSH_CONSTANT_SIZE};
pub use scene::{Scene, SceneObject};
pub use stats::RenderStats;
pub use terrain_renderer::{RenderFrame, TerrainPipelines, TerrainRenderer};
