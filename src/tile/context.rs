use super::{
    Heightmap, HeightmapLoader, TerrainCache, TileBounds, TileCoordinate, TileCpuData,
    TileErrorContext, TileResult,
};
use crate::memory::TerrainMemoryAllocator;
use std::path::Path;
use std::sync::Arc;

/// Shared collaborators a tile needs to load and upload itself
#[derive(Clone)]
pub struct TileLoadContext {
    pub loader: Arc<dyn HeightmapLoader>,
    pub cache: Arc<TerrainCache>,
    pub allocator: Arc<TerrainMemoryAllocator>,
    /// Samples per tile edge
    pub tile_resolution: u32,
    pub height_scale: f32,
    pub generate_normals: bool,
}

impl TileLoadContext {
    pub fn new(
        loader: Arc<dyn HeightmapLoader>,
        cache: Arc<TerrainCache>,
        allocator: Arc<TerrainMemoryAllocator>,
        tile_resolution: u32,
    ) -> Self {
        Self {
            loader,
            cache,
            allocator,
            tile_resolution,
            height_scale: 1.0,
            generate_normals: true,
        }
    }

    /// Whole dataset behind `path`, from the cache or the loader
    pub fn dataset(&self, path: &Path) -> TileResult<Arc<Heightmap>> {
        if let Some(heightmap) = self.cache.get_heightmap(path) {
            return Ok(heightmap);
        }
        let heightmap = Arc::new(self.loader.load(path).tile_context(path)?);
        log::debug!(
            "[TileLoader] Loaded {} ({}x{})",
            path.display(),
            heightmap.width,
            heightmap.height
        );
        self.cache
            .put_heightmap(path.to_path_buf(), Arc::clone(&heightmap));
        Ok(heightmap)
    }

    /// Samples of one tile, resampled from its dataset over `bounds`
    pub fn load_tile_data(
        &self,
        coord: &TileCoordinate,
        bounds: &TileBounds,
        path: &Path,
    ) -> TileResult<Arc<TileCpuData>> {
        if let Some(data) = self.cache.get_tile(coord) {
            return Ok(data);
        }

        let heightmap = self.dataset(path)?;
        let resolution = self.tile_resolution;
        let size = bounds.size();
        let step_x = size.x / (resolution - 1) as f32;
        let step_z = size.z / (resolution - 1) as f32;

        let mut heights = Vec::with_capacity(resolution as usize * resolution as usize);
        for row in 0..resolution {
            let z = bounds.min.z + row as f32 * step_z;
            for column in 0..resolution {
                let x = bounds.min.x + column as f32 * step_x;
                heights.push(heightmap.sample(x, z));
            }
        }

        let mut data = TileCpuData::new(heights, resolution, resolution, self.height_scale)?;
        if self.generate_normals {
            data.compute_normals(step_x, step_z);
        }

        let data = Arc::new(data);
        self.cache.put_tile(coord.clone(), Arc::clone(&data));
        Ok(data)
    }
}
