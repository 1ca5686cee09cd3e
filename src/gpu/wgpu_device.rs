//! wgpu implementation of the GPU command layer
//!
//! Resources live in handle-keyed tables so terrain code only ever sees
//! opaque handles. Creation runs inside an error scope so allocation
//! failures come back as `EngineError` instead of an uncaptured panic.

use super::{
    BufferDescriptor, BufferHandle, BufferUsage, DescriptorBinding, DescriptorSetHandle,
    GpuDevice, ImageDescriptor, ImageFormat, ImageHandle,
};
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct WgpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: ImageDescriptor,
}

struct WgpuDescriptorSet {
    _layout: wgpu::BindGroupLayout,
    _bind_group: wgpu::BindGroup,
}

#[derive(Default)]
struct WgpuResources {
    buffers: FxHashMap<u64, wgpu::Buffer>,
    images: FxHashMap<u64, WgpuImage>,
    descriptor_sets: FxHashMap<u64, WgpuDescriptorSet>,
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    resources: Mutex<WgpuResources>,
    next_id: AtomicU64,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, adapter_name: String) -> Self {
        Self {
            device,
            queue,
            adapter_name,
            resources: Mutex::new(WgpuResources::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a surface-less device on the default adapter
    pub fn request() -> EngineResult<Self> {
        pollster::block_on(Self::request_async())
    }

    async fn request_async() -> EngineResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| EngineError::InitializationFailed {
                component: "wgpu".to_string(),
                reason: "no suitable adapter".to_string(),
            })?;

        let adapter_name = adapter.get_info().name;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Terrain Streamer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|e| EngineError::InitializationFailed {
                component: "wgpu".to_string(),
                reason: e.to_string(),
            })?;

        log::info!("[WgpuDevice] Using adapter '{}'", adapter_name);
        Ok(Self::new(Arc::new(device), Arc::new(queue), adapter_name))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    fn next_handle(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `create` inside an out-of-memory + validation error scope
    fn scoped<T>(&self, operation: &str, create: impl FnOnce() -> T) -> EngineResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(error) => Err(EngineError::GpuOperationFailed {
                operation: operation.to_string(),
                error: error.to_string(),
            }),
            None => Ok(value),
        }
    }

    fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
        match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Staging => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST
            }
        }
    }

    fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
        match format {
            ImageFormat::R32Float => wgpu::TextureFormat::R32Float,
            ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    fn missing(resource_type: &str, id: u64) -> EngineError {
        EngineError::ResourceNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> EngineResult<BufferHandle> {
        let size = wgpu::util::align_to(desc.size.max(4), wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.scoped("create_buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.label),
                size,
                usage: Self::buffer_usages(desc.usage),
                mapped_at_creation: false,
            })
        })?;
        let id = self.next_handle();
        self.resources.lock().buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if let Some(buffer) = self.resources.lock().buffers.remove(&buffer.0) {
            buffer.destroy();
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> EngineResult<()> {
        let resources = self.resources.lock();
        let target = resources
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| Self::missing("buffer", buffer.0))?;
        if offset + data.len() as u64 > target.size() {
            return Err(EngineError::GpuOperationFailed {
                operation: "write_buffer".to_string(),
                error: format!("write of {} bytes at {} overruns buffer", data.len(), offset),
            });
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDescriptor) -> EngineResult<ImageHandle> {
        let layers = desc.layers.max(1);
        let texture = self.scoped("create_image", || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: Self::texture_format(desc.format),
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            dimension: Some(if layers > 1 {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });
        let id = self.next_handle();
        self.resources.lock().images.insert(
            id,
            WgpuImage {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        if let Some(image) = self.resources.lock().images.remove(&image.0) {
            image.texture.destroy();
        }
    }

    fn write_image(&self, image: ImageHandle, layer: u32, data: &[u8]) -> EngineResult<()> {
        let resources = self.resources.lock();
        let target = resources
            .images
            .get(&image.0)
            .ok_or_else(|| Self::missing("image", image.0))?;
        let desc = &target.desc;
        let bytes_per_row = desc.width * desc.format.bytes_per_texel() as u32;
        if data.len() as u64 != bytes_per_row as u64 * desc.height as u64 {
            return Err(EngineError::GpuOperationFailed {
                operation: "write_image".to_string(),
                error: format!("{} bytes do not match image '{}'", data.len(), desc.label),
            });
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_descriptor_set(
        &self,
        bindings: &[DescriptorBinding],
    ) -> EngineResult<DescriptorSetHandle> {
        let resources = self.resources.lock();

        let mut layout_entries = Vec::with_capacity(bindings.len());
        for (index, binding) in bindings.iter().enumerate() {
            let ty = match binding {
                DescriptorBinding::UniformBuffer(_) => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                DescriptorBinding::SampledImage(handle) => {
                    let image = resources
                        .images
                        .get(&handle.0)
                        .ok_or_else(|| Self::missing("image", handle.0))?;
                    wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: if image.desc.layers > 1 {
                            wgpu::TextureViewDimension::D2Array
                        } else {
                            wgpu::TextureViewDimension::D2
                        },
                        multisampled: false,
                    }
                }
            };
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: index as u32,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty,
                count: None,
            });
        }

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Terrain Tile Layout"),
                entries: &layout_entries,
            });

        let mut entries = Vec::with_capacity(bindings.len());
        for (index, binding) in bindings.iter().enumerate() {
            let resource = match binding {
                DescriptorBinding::UniformBuffer(handle) => resources
                    .buffers
                    .get(&handle.0)
                    .ok_or_else(|| Self::missing("buffer", handle.0))?
                    .as_entire_binding(),
                DescriptorBinding::SampledImage(handle) => wgpu::BindingResource::TextureView(
                    &resources
                        .images
                        .get(&handle.0)
                        .ok_or_else(|| Self::missing("image", handle.0))?
                        .view,
                ),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32,
                resource,
            });
        }

        let bind_group = self.scoped("create_descriptor_set", || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Terrain Tile Bind Group"),
                layout: &layout,
                entries: &entries,
            })
        })?;
        drop(entries);
        drop(resources);

        let id = self.next_handle();
        self.resources.lock().descriptor_sets.insert(
            id,
            WgpuDescriptorSet {
                _layout: layout,
                _bind_group: bind_group,
            },
        );
        Ok(DescriptorSetHandle(id))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) {
        self.resources.lock().descriptor_sets.remove(&set.0);
    }
}

