//! Allocator statistics snapshots

use super::utils::format_bytes;
use super::TerrainMemoryType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Point-in-time view of one pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub memory_type: TerrainMemoryType,
    pub total_size: u64,
    pub used_size: u64,
    pub free_size: u64,
    pub peak_used: u64,
    pub active_allocations: usize,
    pub largest_free_block: u64,
    pub fragmentation: f32,
    pub allocation_count: u64,
    pub deallocation_count: u64,
}

/// Aggregated, eventually-consistent allocator snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total_allocated: u64,
    pub total_used: u64,
    pub total_free: u64,
    pub active_allocations: usize,
    pub pool_count: usize,

    pub allocated_by_type: BTreeMap<TerrainMemoryType, u64>,
    pub used_by_type: BTreeMap<TerrainMemoryType, u64>,
    pub count_by_type: BTreeMap<TerrainMemoryType, usize>,

    pub total_allocations: u64,
    pub total_deallocations: u64,
    pub failed_allocations: u64,
    pub leaked_allocations: u64,
    pub defragmentation_passes: u64,

    pub average_allocation_time: Duration,
    pub average_deallocation_time: Duration,

    /// Free-space weighted fragmentation across pools
    pub fragmentation: f32,
    /// `total_used / max_total_memory`
    pub usage_ratio: f32,
}

impl MemoryStats {
    /// Fold per-pool snapshots into the global totals
    pub(crate) fn absorb_pools(&mut self, pools: &[PoolStats]) {
        self.total_allocated = 0;
        self.total_used = 0;
        self.active_allocations = 0;
        self.allocated_by_type.clear();
        self.used_by_type.clear();
        self.count_by_type.clear();

        let mut weighted_fragmentation = 0.0f64;
        let mut free_weight = 0u64;
        for pool in pools {
            self.total_allocated += pool.total_size;
            self.total_used += pool.used_size;
            self.active_allocations += pool.active_allocations;
            self.allocated_by_type.insert(pool.memory_type, pool.total_size);
            self.used_by_type.insert(pool.memory_type, pool.used_size);
            self.count_by_type.insert(pool.memory_type, pool.active_allocations);
            weighted_fragmentation += pool.fragmentation as f64 * pool.free_size as f64;
            free_weight += pool.free_size;
        }

        self.total_free = self.total_allocated - self.total_used;
        self.pool_count = pools.len();
        self.fragmentation = if free_weight == 0 {
            0.0
        } else {
            (weighted_fragmentation / free_weight as f64) as f32
        };
    }

    /// Multi-line summary used by `TerrainMemoryAllocator::memory_report`
    pub fn report_lines(&self, pools: &[PoolStats]) -> Vec<String> {
        let mut lines = vec![
            "Terrain Memory Report:".to_string(),
            format!("  Total Allocated: {}", format_bytes(self.total_allocated)),
            format!("  Total Used: {}", format_bytes(self.total_used)),
            format!("  Total Free: {}", format_bytes(self.total_free)),
            format!("  Usage: {:.1}%", self.usage_ratio * 100.0),
            format!("  Active Allocations: {}", self.active_allocations),
            format!("  Fragmentation: {:.1}%", self.fragmentation * 100.0),
            format!(
                "  Allocations: {} ok, {} failed, {} freed, {} leaked",
                self.total_allocations,
                self.failed_allocations,
                self.total_deallocations,
                self.leaked_allocations
            ),
        ];
        for pool in pools {
            lines.push(format!("  {} Pool:", pool.memory_type));
            lines.push(format!("    Total Size: {}", format_bytes(pool.total_size)));
            lines.push(format!("    Used Size: {}", format_bytes(pool.used_size)));
            lines.push(format!("    Free Size: {}", format_bytes(pool.free_size)));
            lines.push(format!("    Allocations: {}", pool.active_allocations));
            lines.push(format!("    Fragmentation: {:.1}%", pool.fragmentation * 100.0));
        }
        lines
    }
}
