pub mod camera;
pub mod culling;
pub mod error;
pub mod gpu;
pub mod memory;
pub mod renderer;
pub mod streaming;
pub mod tile;

use std::sync::Arc;

pub use camera::TerrainCamera;
pub use culling::{CullingBackend, Frustum, QuadTree};
pub use error::{EngineError, EngineResult};
pub use gpu::{CommandList, CommandRecorder, GpuDevice, HeadlessDevice};
pub use memory::{TerrainMemoryAllocator, TerrainMemoryConfig, TerrainMemoryType};
pub use renderer::{RenderStats, TerrainPipelines, TerrainRenderConfig, TerrainRenderer};
pub use streaming::TerrainTileManager;
pub use tile::{
    HeightmapLoader, SyntheticHeightmapLoader, TerrainTile, TileBounds, TileCoordinate, TileState,
};

/// Composition root: one allocator shared by one renderer.
///
/// The allocator is built first and handed to the renderer, so every tile
/// resource flows through it. Dropping the streamer stops the renderer's
/// threads before the allocator's background thread.
pub struct TerrainStreamer {
    renderer: TerrainRenderer,
    allocator: Arc<TerrainMemoryAllocator>,
}

impl TerrainStreamer {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        loader: Arc<dyn HeightmapLoader>,
        pipelines: TerrainPipelines,
        render_config: TerrainRenderConfig,
        memory_config: TerrainMemoryConfig,
    ) -> EngineResult<Self> {
        let allocator = TerrainMemoryAllocator::new(device, memory_config)?;
        let renderer =
            TerrainRenderer::new(Arc::clone(&allocator), loader, pipelines, render_config)?;
        Ok(Self {
            renderer,
            allocator,
        })
    }

    pub fn renderer(&self) -> &TerrainRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut TerrainRenderer {
        &mut self.renderer
    }

    pub fn allocator(&self) -> &Arc<TerrainMemoryAllocator> {
        &self.allocator
    }
}

impl Drop for TerrainStreamer {
    fn drop(&mut self) {
        self.renderer.shutdown();
        self.renderer.tile_manager().remove_all_tiles();
        self.allocator.shutdown();
    }
}
