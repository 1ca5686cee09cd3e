/// GPU Frustum Culling
///
/// Classifies tile bounds with a compute pass. Each call uploads the object
/// array and parameters, dispatches 64-wide workgroups that write a packed
/// visibility mask, and blocks on the readback before returning.
use super::Frustum;
use crate::error::{EngineError, EngineResult};
use crate::gpu::WgpuDevice;
use crate::tile::TileBounds;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use wgpu::util::DeviceExt;

pub const CULLING_WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullableObjectGpu {
    pub min_bounds: [f32; 4],
    pub max_bounds: [f32; 4],
}

impl From<&TileBounds> for CullableObjectGpu {
    fn from(bounds: &TileBounds) -> Self {
        Self {
            min_bounds: bounds.min.extend(0.0).to_array(),
            max_bounds: bounds.max.extend(0.0).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrustumPlaneGpu {
    pub plane: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullingParamsGpu {
    pub planes: [FrustumPlaneGpu; 6],
    pub eye: [f32; 4],
    pub object_count: u32,
    pub _padding: [u32; 3],
}

impl CullingParamsGpu {
    pub fn new(frustum: &Frustum, object_count: u32) -> Self {
        Self {
            planes: frustum.planes.map(|plane| FrustumPlaneGpu {
                plane: plane.to_array(),
            }),
            eye: frustum.eye.extend(1.0).to_array(),
            object_count,
            _padding: [0; 3],
        }
    }
}

pub struct GpuCuller {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuCuller {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> EngineResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Terrain Frustum Cull Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("frustum_cull.wgsl").into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Frustum Cull Bind Group Layout"),
            entries: &[
                // Culling parameters
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Objects (read)
                storage_entry(1, true),
                // Visibility mask (read_write)
                storage_entry(2, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Terrain Frustum Cull Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Terrain Frustum Cull Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(EngineError::InitializationFailed {
                component: "GPU culler".to_string(),
                reason: error.to_string(),
            });
        }

        log::info!("[GpuCuller] Compute culling pipeline ready");
        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
        })
    }

    pub fn from_wgpu_device(device: &WgpuDevice) -> EngineResult<Self> {
        Self::new(Arc::clone(device.device()), Arc::clone(device.queue()))
    }

    /// One flag per box, same contract as `Frustum::is_box_visible`
    pub fn classify(&self, frustum: &Frustum, objects: &[TileBounds]) -> EngineResult<Vec<bool>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let gpu_objects: Vec<CullableObjectGpu> = objects.iter().map(Into::into).collect();
        let params = CullingParamsGpu::new(frustum, objects.len() as u32);
        let mask_words = (objects.len() + 31) / 32;
        let mask_size = (mask_words * std::mem::size_of::<u32>()) as u64;

        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Terrain Cull Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let object_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Terrain Cull Objects"),
                contents: bytemuck::cast_slice(&gpu_objects),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let visibility_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Terrain Cull Visibility"),
                contents: bytemuck::cast_slice(&vec![0u32; mask_words]),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Cull Readback"),
            size: mask_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Frustum Cull Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: object_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: visibility_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Terrain Cull Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Terrain Frustum Cull Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let workgroups = (objects.len() as u32 + CULLING_WORKGROUP_SIZE - 1) / CULLING_WORKGROUP_SIZE;
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&visibility_buffer, 0, &staging_buffer, 0, mask_size);
        self.queue.submit(Some(encoder.finish()));

        // Synchronous readback
        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        let mapped = pollster::block_on(receiver).map_err(|_| EngineError::GpuOperationFailed {
            operation: "cull readback".to_string(),
            error: "map callback dropped".to_string(),
        })?;
        mapped.map_err(|e| EngineError::GpuOperationFailed {
            operation: "cull readback".to_string(),
            error: e.to_string(),
        })?;

        let data = buffer_slice.get_mapped_range();
        let words: &[u32] = bytemuck::cast_slice(&data[..]);
        let visible = (0..objects.len())
            .map(|index| words[index / 32] & (1 << (index % 32)) != 0)
            .collect();

        drop(data);
        staging_buffer.unmap();

        Ok(visible)
    }
}
