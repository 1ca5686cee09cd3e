//! GPU command layer
//!
//! Terrain code records against these traits only. `HeadlessDevice` keeps
//! everything in host memory, `WgpuDevice` maps the same calls onto wgpu.

pub mod commands;
pub mod device;
pub mod handles;
pub mod headless;
pub mod wgpu_device;

pub use commands::{CommandList, CommandRecorder, RecordedCommand};
pub use device::GpuDevice;
pub use handles::{
    BufferDescriptor, BufferHandle, BufferUsage, DescriptorBinding, DescriptorSetHandle,
    ImageDescriptor, ImageFormat, ImageHandle, NativeResource, PipelineHandle,
    PipelineLayoutHandle,
};
pub use headless::HeadlessDevice;
pub use wgpu_device::WgpuDevice;
