//! In-memory GPU device
//!
//! Keeps buffer and image contents in host memory so the streaming pipeline
//! can run without an adapter. Also supports failure injection for tests.

use super::{
    BufferDescriptor, BufferHandle, DescriptorBinding, DescriptorSetHandle, GpuDevice,
    ImageDescriptor, ImageHandle,
};
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct HeadlessImage {
    desc: ImageDescriptor,
    data: Vec<u8>,
}

#[derive(Default)]
struct HeadlessResources {
    buffers: FxHashMap<u64, Vec<u8>>,
    images: FxHashMap<u64, HeadlessImage>,
    descriptor_sets: FxHashMap<u64, Vec<DescriptorBinding>>,
}

pub struct HeadlessDevice {
    resources: Mutex<HeadlessResources>,
    next_id: AtomicU64,
    /// Number of upcoming create calls that should fail
    pending_failures: AtomicUsize,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HeadlessResources::default()),
            next_id: AtomicU64::new(1),
            pending_failures: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` buffer/image creations fail
    pub fn fail_next_creations(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn live_buffers(&self) -> usize {
        self.resources.lock().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.resources.lock().images.len()
    }

    pub fn live_descriptor_sets(&self) -> usize {
        self.resources.lock().descriptor_sets.len()
    }

    /// Bytes currently held by buffers and images
    pub fn resident_bytes(&self) -> u64 {
        let resources = self.resources.lock();
        let buffers: u64 = resources.buffers.values().map(|b| b.len() as u64).sum();
        let images: u64 = resources.images.values().map(|i| i.data.len() as u64).sum();
        buffers + images
    }

    /// Copy of an image's contents, for inspection
    pub fn read_image(&self, image: ImageHandle) -> Option<Vec<u8>> {
        self.resources
            .lock()
            .images
            .get(&image.0)
            .map(|img| img.data.clone())
    }

    fn next_handle(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn take_failure(&self, operation: &str) -> EngineResult<()> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(EngineError::GpuOperationFailed {
                operation: operation.to_string(),
                error: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> EngineResult<BufferHandle> {
        self.take_failure("create_buffer")?;
        let id = self.next_handle();
        self.resources
            .lock()
            .buffers
            .insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.resources.lock().buffers.remove(&buffer.0);
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> EngineResult<()> {
        let mut resources = self.resources.lock();
        let storage = resources.buffers.get_mut(&buffer.0).ok_or_else(|| {
            EngineError::ResourceNotFound {
                resource_type: "buffer".to_string(),
                id: buffer.0.to_string(),
            }
        })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            return Err(EngineError::GpuOperationFailed {
                operation: "write_buffer".to_string(),
                error: format!("write of {} bytes at {} overruns {}", data.len(), offset, storage.len()),
            });
        }
        storage[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDescriptor) -> EngineResult<ImageHandle> {
        self.take_failure("create_image")?;
        if desc.width == 0 || desc.height == 0 {
            return Err(EngineError::GpuOperationFailed {
                operation: "create_image".to_string(),
                error: format!("zero-sized image '{}'", desc.label),
            });
        }
        let id = self.next_handle();
        self.resources.lock().images.insert(
            id,
            HeadlessImage {
                desc: desc.clone(),
                data: vec![0; desc.byte_size() as usize],
            },
        );
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.resources.lock().images.remove(&image.0);
    }

    fn write_image(&self, image: ImageHandle, layer: u32, data: &[u8]) -> EngineResult<()> {
        let mut resources = self.resources.lock();
        let img = resources.images.get_mut(&image.0).ok_or_else(|| {
            EngineError::ResourceNotFound {
                resource_type: "image".to_string(),
                id: image.0.to_string(),
            }
        })?;
        let layer_bytes = img.desc.width as usize
            * img.desc.height as usize
            * img.desc.format.bytes_per_texel() as usize;
        if layer >= img.desc.layers.max(1) || data.len() != layer_bytes {
            return Err(EngineError::GpuOperationFailed {
                operation: "write_image".to_string(),
                error: format!(
                    "layer {} with {} bytes does not match image '{}'",
                    layer,
                    data.len(),
                    img.desc.label
                ),
            });
        }
        let start = layer as usize * layer_bytes;
        img.data[start..start + layer_bytes].copy_from_slice(data);
        Ok(())
    }

    fn create_descriptor_set(
        &self,
        bindings: &[DescriptorBinding],
    ) -> EngineResult<DescriptorSetHandle> {
        let id = self.next_handle();
        self.resources
            .lock()
            .descriptor_sets
            .insert(id, bindings.to_vec());
        Ok(DescriptorSetHandle(id))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) {
        self.resources.lock().descriptor_sets.remove(&set.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BufferUsage, ImageFormat};

    #[test]
    fn test_buffer_lifecycle() {
        let device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: "test".into(),
                size: 16,
                usage: BufferUsage::Vertex,
            })
            .unwrap();
        assert_eq!(device.live_buffers(), 1);

        device.write_buffer(buffer, 8, &[1, 2, 3, 4]).unwrap();
        assert!(device.write_buffer(buffer, 14, &[0; 4]).is_err());

        device.destroy_buffer(buffer);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_image_write_checks_size() {
        let device = HeadlessDevice::new();
        let image = device
            .create_image(&ImageDescriptor {
                label: "height".into(),
                width: 2,
                height: 2,
                layers: 1,
                format: ImageFormat::R32Float,
            })
            .unwrap();
        assert!(device.write_image(image, 0, &[0; 16]).is_ok());
        assert!(device.write_image(image, 0, &[0; 8]).is_err());
        assert!(device.write_image(image, 1, &[0; 16]).is_err());
    }

    #[test]
    fn test_injected_failures() {
        let device = HeadlessDevice::new();
        device.fail_next_creations(1);
        let desc = BufferDescriptor {
            label: "test".into(),
            size: 4,
            usage: BufferUsage::Staging,
        };
        assert!(device.create_buffer(&desc).is_err());
        assert!(device.create_buffer(&desc).is_ok());
    }
}
