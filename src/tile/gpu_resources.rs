use crate::gpu::{BufferHandle, DescriptorSetHandle, ImageHandle};
use crate::memory::{MemoryAllocation, TerrainMemoryAllocator};
use std::sync::Arc;

/// GPU side of one tile.
///
/// Every allocation goes back to the allocator when this is dropped, so a
/// half-built set of resources cleans up after itself on upload failure.
pub struct TileGpuResources {
    allocator: Arc<TerrainMemoryAllocator>,
    pub(crate) vertex_buffer: Option<Arc<MemoryAllocation>>,
    pub(crate) index_buffer: Option<Arc<MemoryAllocation>>,
    pub(crate) height_texture: Option<Arc<MemoryAllocation>>,
    pub(crate) normal_texture: Option<Arc<MemoryAllocation>>,
    pub(crate) descriptor_set: Option<DescriptorSetHandle>,
}

impl TileGpuResources {
    pub fn new(allocator: Arc<TerrainMemoryAllocator>) -> Self {
        Self {
            allocator,
            vertex_buffer: None,
            index_buffer: None,
            height_texture: None,
            normal_texture: None,
            descriptor_set: None,
        }
    }

    /// Drawable: mesh, height texture and descriptor set all present
    pub fn is_valid(&self) -> bool {
        self.vertex_buffer.is_some()
            && self.index_buffer.is_some()
            && self.height_texture.is_some()
            && self.descriptor_set.is_some()
    }

    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.vertex_buffer
            .as_ref()
            .and_then(|a| a.resource().as_buffer())
    }

    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
            .as_ref()
            .and_then(|a| a.resource().as_buffer())
    }

    pub fn height_texture(&self) -> Option<ImageHandle> {
        self.height_texture
            .as_ref()
            .and_then(|a| a.resource().as_image())
    }

    pub fn normal_texture(&self) -> Option<ImageHandle> {
        self.normal_texture
            .as_ref()
            .and_then(|a| a.resource().as_image())
    }

    pub fn descriptor_set(&self) -> Option<DescriptorSetHandle> {
        self.descriptor_set
    }

    /// Pool bytes held by all allocations
    pub fn total_memory_usage(&self) -> u64 {
        [
            &self.vertex_buffer,
            &self.index_buffer,
            &self.height_texture,
            &self.normal_texture,
        ]
        .into_iter()
        .flatten()
        .map(|allocation| allocation.aligned_size())
        .sum()
    }

    /// Mark every allocation as used this frame
    pub fn touch(&self) {
        for allocation in [
            &self.vertex_buffer,
            &self.index_buffer,
            &self.height_texture,
            &self.normal_texture,
        ]
        .into_iter()
        .flatten()
        {
            allocation.touch();
        }
    }
}

impl Drop for TileGpuResources {
    fn drop(&mut self) {
        if let Some(set) = self.descriptor_set.take() {
            self.allocator.device().destroy_descriptor_set(set);
        }
        for allocation in [
            self.vertex_buffer.take(),
            self.index_buffer.take(),
            self.height_texture.take(),
            self.normal_texture.take(),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = self.allocator.deallocate(&allocation) {
                log::warn!(
                    "[TileGpuResources] Failed to release {} allocation {}: {}",
                    allocation.memory_type(),
                    allocation.id(),
                    e
                );
            }
        }
    }
}
