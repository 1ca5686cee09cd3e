// Terrain tile streaming
// Coordinate-keyed tile map, the load FIFO and the threads that drain it

pub mod dataset;
pub mod error;
pub mod load_queue;
pub mod tile_manager;
pub mod workers;

pub use dataset::{DatasetInfo, DatasetRegistry};
pub use error::{LoadFailure, StreamingErrorContext, StreamingResult};
pub use load_queue::{LoadQueue, LoadRequest};
pub use tile_manager::{TerrainTileManager, TileManagerStats};
pub use workers::{StreamingConfig, StreamingShared, StreamingStats, StreamingWorkers};

/// Frames a tile may go unused before the streaming thread drops it
pub const DEFAULT_EVICTION_FRAMES: u32 = 300;

/// New load requests handed to the loaders per frame
pub const DEFAULT_LOADS_PER_FRAME: usize = 16;
