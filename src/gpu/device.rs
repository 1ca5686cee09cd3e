use super::{
    BufferDescriptor, BufferHandle, DescriptorBinding, DescriptorSetHandle, ImageDescriptor,
    ImageHandle,
};
use crate::error::EngineResult;

/// Resource side of the GPU command layer.
///
/// Terrain code creates and destroys native buffers and images through this
/// trait and never talks to a graphics API directly. Queue submission and
/// command-pool synchronization stay with the implementor.
pub trait GpuDevice: Send + Sync {
    fn name(&self) -> &str;

    fn create_buffer(&self, desc: &BufferDescriptor) -> EngineResult<BufferHandle>;
    fn destroy_buffer(&self, buffer: BufferHandle);
    /// Write `data` into a mapped range of `buffer` starting at `offset`
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> EngineResult<()>;

    fn create_image(&self, desc: &ImageDescriptor) -> EngineResult<ImageHandle>;
    fn destroy_image(&self, image: ImageHandle);
    fn write_image(&self, image: ImageHandle, layer: u32, data: &[u8]) -> EngineResult<()>;

    fn create_descriptor_set(
        &self,
        bindings: &[DescriptorBinding],
    ) -> EngineResult<DescriptorSetHandle>;
    fn destroy_descriptor_set(&self, set: DescriptorSetHandle);
}
