//! Pool types and allocator configuration

use super::{AllocationStrategy, MemoryResult};
use crate::error::EngineError;
use crate::gpu::BufferUsage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const MB: u64 = 1024 * 1024;

/// Kind of GPU resource a pool hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TerrainMemoryType {
    VertexBuffer,
    IndexBuffer,
    HeightTexture,
    ColorTexture,
    NormalTexture,
    UniformBuffer,
    StagingBuffer,
    ComputeBuffer,
}

impl TerrainMemoryType {
    pub const ALL: [TerrainMemoryType; 8] = [
        TerrainMemoryType::VertexBuffer,
        TerrainMemoryType::IndexBuffer,
        TerrainMemoryType::HeightTexture,
        TerrainMemoryType::ColorTexture,
        TerrainMemoryType::NormalTexture,
        TerrainMemoryType::UniformBuffer,
        TerrainMemoryType::StagingBuffer,
        TerrainMemoryType::ComputeBuffer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TerrainMemoryType::VertexBuffer => "VertexBuffer",
            TerrainMemoryType::IndexBuffer => "IndexBuffer",
            TerrainMemoryType::HeightTexture => "HeightTexture",
            TerrainMemoryType::ColorTexture => "ColorTexture",
            TerrainMemoryType::NormalTexture => "NormalTexture",
            TerrainMemoryType::UniformBuffer => "UniformBuffer",
            TerrainMemoryType::StagingBuffer => "StagingBuffer",
            TerrainMemoryType::ComputeBuffer => "ComputeBuffer",
        }
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            TerrainMemoryType::HeightTexture
                | TerrainMemoryType::ColorTexture
                | TerrainMemoryType::NormalTexture
        )
    }

    /// Buffer binding for buffer-backed types, `None` for textures
    pub fn buffer_usage(self) -> Option<BufferUsage> {
        match self {
            TerrainMemoryType::VertexBuffer => Some(BufferUsage::Vertex),
            TerrainMemoryType::IndexBuffer => Some(BufferUsage::Index),
            TerrainMemoryType::UniformBuffer => Some(BufferUsage::Uniform),
            TerrainMemoryType::StagingBuffer => Some(BufferUsage::Staging),
            TerrainMemoryType::ComputeBuffer => Some(BufferUsage::Storage),
            _ => None,
        }
    }
}

impl std::fmt::Display for TerrainMemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-type pool tuning
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub preferred_pool_size: u64,
    pub min_pool_size: u64,
    pub alignment: u64,
    pub enable_defragmentation: bool,
    pub growth_factor: f32,
    pub strategy: AllocationStrategy,
}

impl PoolConfig {
    /// Defaults per type. Textures are large and rarely churned, so they get
    /// coarse alignment and no defragmentation.
    pub fn for_type(memory_type: TerrainMemoryType) -> Self {
        let (preferred, min, alignment, defrag, growth) = match memory_type {
            TerrainMemoryType::VertexBuffer => (128 * MB, 16 * MB, 256, true, 1.5),
            TerrainMemoryType::IndexBuffer => (64 * MB, 8 * MB, 256, true, 1.5),
            TerrainMemoryType::HeightTexture => (256 * MB, 32 * MB, 1024, false, 2.0),
            TerrainMemoryType::ColorTexture => (512 * MB, 64 * MB, 1024, false, 2.0),
            TerrainMemoryType::NormalTexture => (256 * MB, 32 * MB, 1024, false, 2.0),
            TerrainMemoryType::UniformBuffer => (16 * MB, 2 * MB, 256, true, 1.5),
            TerrainMemoryType::StagingBuffer => (64 * MB, 8 * MB, 256, true, 1.5),
            TerrainMemoryType::ComputeBuffer => (32 * MB, 4 * MB, 256, true, 1.5),
        };
        Self {
            preferred_pool_size: preferred,
            min_pool_size: min,
            alignment,
            enable_defragmentation: defrag,
            growth_factor: growth,
            strategy: AllocationStrategy::BestFit,
        }
    }
}

/// Allocator-wide configuration
#[derive(Debug, Clone)]
pub struct TerrainMemoryConfig {
    /// Upper bound on the sum of all pool sizes
    pub max_total_memory: u64,
    /// Usage ratio that notifies the pressure callback
    pub warning_threshold: f32,
    /// Usage ratio that forces GC and an emergency defrag
    pub critical_threshold: f32,
    pub enable_auto_defrag: bool,
    /// Fragmentation above which the background pass defragments a pool
    pub defrag_threshold: f32,
    pub defrag_interval: Duration,
    pub max_defrag_time: Duration,
    pub emergency_defrag_time: Duration,
    pub gc_interval: Duration,
    pub enable_background_thread: bool,
    pub pools: BTreeMap<TerrainMemoryType, PoolConfig>,
}

impl Default for TerrainMemoryConfig {
    fn default() -> Self {
        Self {
            max_total_memory: 2048 * MB,
            warning_threshold: 0.8,
            critical_threshold: 0.95,
            enable_auto_defrag: true,
            defrag_threshold: 0.3,
            defrag_interval: Duration::from_secs(5),
            max_defrag_time: Duration::from_millis(16),
            emergency_defrag_time: Duration::from_millis(50),
            gc_interval: Duration::from_millis(100),
            enable_background_thread: true,
            pools: TerrainMemoryType::ALL
                .iter()
                .map(|&t| (t, PoolConfig::for_type(t)))
                .collect(),
        }
    }
}

impl TerrainMemoryConfig {
    pub fn pool_config(&self, memory_type: TerrainMemoryType) -> PoolConfig {
        self.pools
            .get(&memory_type)
            .cloned()
            .unwrap_or_else(|| PoolConfig::for_type(memory_type))
    }

    /// Scale every pool's preferred and minimum size, e.g. for small test budgets
    pub fn scale_pools(mut self, factor: f64) -> Self {
        for pool in self.pools.values_mut() {
            pool.preferred_pool_size = ((pool.preferred_pool_size as f64 * factor) as u64).max(pool.alignment);
            pool.min_pool_size = ((pool.min_pool_size as f64 * factor) as u64).max(pool.alignment);
        }
        self
    }

    pub fn validate(&self) -> MemoryResult<()> {
        let invalid = |field: &str, reason: &str| EngineError::InvalidConfig {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.max_total_memory == 0 {
            return Err(invalid("max_total_memory", "must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.warning_threshold) {
            return Err(invalid("warning_threshold", "must be within [0, 1]"));
        }
        if !(self.warning_threshold..=1.0).contains(&self.critical_threshold) {
            return Err(invalid(
                "critical_threshold",
                "must be within [warning_threshold, 1]",
            ));
        }
        if self.gc_interval.is_zero() {
            return Err(invalid("gc_interval", "must be non-zero"));
        }
        for (memory_type, pool) in &self.pools {
            if pool.alignment == 0 || !pool.alignment.is_power_of_two() {
                return Err(invalid(
                    memory_type.name(),
                    "pool alignment must be a power of two",
                ));
            }
            if pool.min_pool_size == 0 || pool.min_pool_size > pool.preferred_pool_size {
                return Err(invalid(
                    memory_type.name(),
                    "min pool size must be non-zero and not exceed preferred size",
                ));
            }
            if pool.growth_factor < 1.0 {
                return Err(invalid(memory_type.name(), "growth factor must be >= 1"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_pools_skip_defrag() {
        for memory_type in TerrainMemoryType::ALL {
            let config = PoolConfig::for_type(memory_type);
            assert_eq!(config.enable_defragmentation, !memory_type.is_texture());
            assert_eq!(memory_type.buffer_usage().is_none(), memory_type.is_texture());
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TerrainMemoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pools.len(), 8);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = TerrainMemoryConfig {
            warning_threshold: 0.9,
            critical_threshold: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scale_pools_keeps_alignment_floor() {
        let config = TerrainMemoryConfig::default().scale_pools(0.0);
        let vertex = config.pool_config(TerrainMemoryType::VertexBuffer);
        assert_eq!(vertex.min_pool_size, 256);
        assert!(config.validate().is_ok());
    }
}
