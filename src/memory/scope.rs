//! RAII allocation scope

use super::{MemoryAllocation, MemoryResult, TerrainMemoryAllocator, TerrainMemoryType};
use crate::gpu::ImageFormat;
use std::sync::Arc;

/// Deallocates everything allocated through it when dropped, unless
/// auto cleanup is switched off.
pub struct MemoryScope {
    allocator: Arc<TerrainMemoryAllocator>,
    allocations: Vec<Arc<MemoryAllocation>>,
    auto_cleanup: bool,
}

impl MemoryScope {
    pub fn new(allocator: Arc<TerrainMemoryAllocator>) -> Self {
        Self {
            allocator,
            allocations: Vec::new(),
            auto_cleanup: true,
        }
    }

    pub fn allocate(
        &mut self,
        memory_type: TerrainMemoryType,
        size: u64,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        let allocation = self.allocator.allocate(memory_type, size)?;
        self.allocations.push(Arc::clone(&allocation));
        Ok(allocation)
    }

    pub fn allocate_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: ImageFormat,
        memory_type: TerrainMemoryType,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        let allocation = self
            .allocator
            .allocate_texture_2d(width, height, format, memory_type)?;
        self.allocations.push(Arc::clone(&allocation));
        Ok(allocation)
    }

    pub fn set_auto_cleanup(&mut self, enabled: bool) {
        self.auto_cleanup = enabled;
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Give up ownership without deallocating
    pub fn release(mut self) -> Vec<Arc<MemoryAllocation>> {
        std::mem::take(&mut self.allocations)
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if !self.auto_cleanup {
            return;
        }
        for allocation in self.allocations.drain(..) {
            if let Err(e) = self.allocator.deallocate(&allocation) {
                log::warn!("[MemoryScope] Failed to release allocation {}: {}", allocation.id(), e);
            }
        }
    }
}
