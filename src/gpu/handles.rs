//! Opaque handles and resource descriptors for the GPU command layer

use serde::{Deserialize, Serialize};

macro_rules! gpu_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

gpu_handle!(BufferHandle);
gpu_handle!(ImageHandle);
gpu_handle!(DescriptorSetHandle);
gpu_handle!(PipelineHandle);
gpu_handle!(PipelineLayoutHandle);

/// How a buffer will be bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Staging,
    Storage,
}

/// Texel formats used by terrain images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    R32Float,
    Rgba8Unorm,
    Rgba32Float,
}

impl ImageFormat {
    pub fn bytes_per_texel(self) -> u64 {
        match self {
            ImageFormat::R32Float => 4,
            ImageFormat::Rgba8Unorm => 4,
            ImageFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: ImageFormat,
}

impl ImageDescriptor {
    /// Bytes needed to hold every layer of the image
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.layers.max(1) as u64 * self.format.bytes_per_texel()
    }
}

/// Either side of a native allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResource {
    Buffer(BufferHandle),
    Image(ImageHandle),
}

impl NativeResource {
    pub fn as_buffer(self) -> Option<BufferHandle> {
        match self {
            NativeResource::Buffer(handle) => Some(handle),
            NativeResource::Image(_) => None,
        }
    }

    pub fn as_image(self) -> Option<ImageHandle> {
        match self {
            NativeResource::Image(handle) => Some(handle),
            NativeResource::Buffer(_) => None,
        }
    }
}

/// One entry of a descriptor set, in binding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorBinding {
    UniformBuffer(BufferHandle),
    SampledImage(ImageHandle),
}
