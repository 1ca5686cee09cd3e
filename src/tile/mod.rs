/// Terrain Tiles
///
/// Coordinates, bounds and the per-tile state machine, plus everything a
/// tile needs to fill itself: the heightmap loader contract, the CPU cache
/// and the GPU resources built at upload time.

pub mod bounds;
pub mod cache;
pub mod context;
pub mod coordinate;
pub mod cpu_data;
pub mod error;
pub mod gpu_resources;
pub mod loader;
pub mod mesh;
pub mod state;
pub mod terrain_tile;

pub use bounds::TileBounds;
pub use cache::{CacheStats, TerrainCache};
pub use context::TileLoadContext;
pub use coordinate::TileCoordinate;
pub use cpu_data::TileCpuData;
pub use error::{invalid_state_error, load_error, TileErrorContext, TileResult};
pub use gpu_resources::TileGpuResources;
pub use loader::{
    Heightmap, HeightmapLoader, LoaderError, SyntheticHeightmapLoader, SyntheticTerrainConfig,
};
pub use mesh::{
    base_grid_vertices, patch_indices, TerrainVertex, PATCH_CONTROL_POINTS, PATCH_INDEX_COUNT,
    VERTICES_PER_SIDE,
};
pub use state::{TileState, TileStateCell};
pub use terrain_tile::{TerrainTile, MAX_LOD};
