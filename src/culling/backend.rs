use super::{Frustum, GpuCuller, QuadTree};
use crate::tile::TileBounds;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Leaf capacity of the per-frame quadtree
const QUADTREE_MAX_OBJECTS: usize = 8;
const QUADTREE_MAX_DEPTH: u32 = 8;

/// Where visibility classification runs.
///
/// Both variants honor `Frustum::is_box_visible`, so swapping one for the
/// other never changes which tiles are drawn.
pub enum CullingBackend {
    Cpu,
    Gpu {
        culler: GpuCuller,
        fallback_logged: AtomicBool,
    },
}

impl CullingBackend {
    pub fn cpu() -> Self {
        CullingBackend::Cpu
    }

    /// GPU backend when the pipeline can be built, CPU quadtree otherwise
    pub fn gpu(device: Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)>) -> Self {
        let Some((device, queue)) = device else {
            log::warn!("[Culling] No wgpu device available, using CPU quadtree culling");
            return CullingBackend::Cpu;
        };
        match GpuCuller::new(device, queue) {
            Ok(culler) => CullingBackend::Gpu {
                culler,
                fallback_logged: AtomicBool::new(false),
            },
            Err(e) => {
                log::warn!(
                    "[Culling] GPU culling unavailable ({}), using CPU quadtree culling",
                    e
                );
                CullingBackend::Cpu
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CullingBackend::Cpu => "cpu-quadtree",
            CullingBackend::Gpu { .. } => "gpu-compute",
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, CullingBackend::Gpu { .. })
    }

    /// One visibility flag per box
    pub fn classify(&self, frustum: &Frustum, objects: &[TileBounds]) -> Vec<bool> {
        match self {
            CullingBackend::Cpu => classify_cpu(frustum, objects),
            CullingBackend::Gpu {
                culler,
                fallback_logged,
            } => match culler.classify(frustum, objects) {
                Ok(visible) => visible,
                Err(e) => {
                    if !fallback_logged.swap(true, Ordering::Relaxed) {
                        log::warn!("[Culling] GPU culling failed ({}), falling back to CPU", e);
                    }
                    classify_cpu(frustum, objects)
                }
            },
        }
    }
}

/// Quadtree pass over the boxes; ids are indices into `objects`
pub fn classify_cpu(frustum: &Frustum, objects: &[TileBounds]) -> Vec<bool> {
    let tree = QuadTree::from_bounds(objects, QUADTREE_MAX_OBJECTS, QUADTREE_MAX_DEPTH);
    let mut visible = vec![false; objects.len()];
    for id in tree.cull_frustum(frustum) {
        visible[id as usize] = true;
    }
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    #[test]
    fn test_cpu_classification_per_object() {
        let eye = Vec3::new(0.0, 10.0, 0.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 10.0, -1.0), Vec3::Y);
        let proj = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 500.0);
        let frustum = Frustum::from_view_projection(proj * view, eye);

        let objects = vec![
            TileBounds::new(Vec3::new(-5.0, 0.0, -50.0), Vec3::new(5.0, 20.0, -40.0)),
            TileBounds::new(Vec3::new(-5.0, 0.0, 40.0), Vec3::new(5.0, 20.0, 50.0)),
            TileBounds::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 20.0, 1.0)),
        ];
        let backend = CullingBackend::cpu();
        assert_eq!(backend.classify(&frustum, &objects), vec![true, false, true]);
        assert!(backend.classify(&frustum, &[]).is_empty());
        assert_eq!(backend.name(), "cpu-quadtree");
    }

    #[test]
    fn test_gpu_without_device_falls_back() {
        let backend = CullingBackend::gpu(None);
        assert!(!backend.is_gpu());
    }
}
