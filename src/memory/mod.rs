/// Terrain Memory Management
///
/// Typed GPU memory pools with pressure detection and bounded
/// defragmentation. Every tile resource is allocated through a
/// `TerrainMemoryAllocator` passed in by the owner of the renderer.

pub mod allocator;
pub mod config;
pub mod error;
pub mod memory_pool;
pub mod scope;
pub mod stats;
pub mod utils;

pub use allocator::{
    AllocationFailedCallback, MemoryPressure, PressureCallback, TerrainMemoryAllocator,
};
pub use config::{PoolConfig, TerrainMemoryConfig, TerrainMemoryType};
pub use error::{allocation_error, out_of_memory_error, MemoryErrorContext, MemoryResult};
pub use memory_pool::{AllocationStrategy, MemoryAllocation, MemoryPool, Reservation};
pub use scope::MemoryScope;
pub use stats::{MemoryStats, PoolStats};
pub use utils::{
    align_size, calculate_optimal_pool_size, format_bytes, is_aligned, optimal_alignment,
    parse_memory_size,
};
