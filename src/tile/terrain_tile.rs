//! One streamed terrain tile
//!
//! The tile owns its CPU samples and GPU resources and walks them through
//! `TileState`. The atomic state answers "what stage is this tile in"; the
//! tile mutex guards the resource swap itself, so eviction never releases
//! resources while an upload or a draw recording holds them.

use super::{
    base_grid_vertices, invalid_state_error, patch_indices, TileBounds, TileCoordinate,
    TileCpuData, TileGpuResources, TileLoadContext, TileResult, TileState, TileStateCell,
    PATCH_INDEX_COUNT,
};
use crate::culling::Frustum;
use crate::error::EngineError;
use crate::gpu::{CommandRecorder, DescriptorBinding, ImageFormat, PipelineLayoutHandle};
use crate::memory::TerrainMemoryType;
use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coarsest LOD band
pub const MAX_LOD: u32 = 7;

/// Number of levels counted by the detail term of the priority
const PRIORITY_MAX_LEVEL: f32 = 8.0;
const PRIORITY_DISTANCE_WEIGHT: f32 = 1000.0;
const PRIORITY_LEVEL_WEIGHT: f32 = 10.0;
const PRIORITY_RECENCY_WEIGHT: f32 = 1.0;
const PRIORITY_RECENCY_WINDOW: f32 = 100.0;

const STATE_HISTORY_LEN: usize = 32;

#[derive(Default)]
struct TileInner {
    cpu: Option<Arc<TileCpuData>>,
    gpu: Option<TileGpuResources>,
    error: Option<String>,
    load_time: Option<Duration>,
    upload_time: Option<Duration>,
    loaded_at: Option<Instant>,
}

pub struct TerrainTile {
    coordinate: TileCoordinate,
    bounds: RwLock<TileBounds>,
    state: TileStateCell,
    inner: Mutex<TileInner>,
    /// Byte counts mirrored from `inner`, readable without the tile mutex
    cpu_bytes: AtomicU64,
    gpu_bytes: AtomicU64,
    history: Mutex<Vec<TileState>>,
    priority: AtomicU32,
    frames_since_access: AtomicU32,
    lod: AtomicU32,
}

impl TerrainTile {
    pub fn new(coordinate: TileCoordinate, bounds: TileBounds) -> Self {
        Self {
            lod: AtomicU32::new(coordinate.level.min(MAX_LOD)),
            coordinate,
            bounds: RwLock::new(bounds),
            state: TileStateCell::new(TileState::Empty),
            inner: Mutex::new(TileInner::default()),
            cpu_bytes: AtomicU64::new(0),
            gpu_bytes: AtomicU64::new(0),
            history: Mutex::new(vec![TileState::Empty]),
            priority: AtomicU32::new(0f32.to_bits()),
            frames_since_access: AtomicU32::new(0),
        }
    }

    pub fn coordinate(&self) -> &TileCoordinate {
        &self.coordinate
    }

    pub fn bounds(&self) -> TileBounds {
        *self.bounds.read()
    }

    pub fn state(&self) -> TileState {
        self.state.load()
    }

    /// States visited so far, oldest first
    pub fn state_history(&self) -> Vec<TileState> {
        self.history.lock().clone()
    }

    fn record(&self, state: TileState) {
        let mut history = self.history.lock();
        if history.len() == STATE_HISTORY_LEN {
            history.remove(0);
        }
        history.push(state);
        log::trace!("[TerrainTile] {} -> {}", self.coordinate, state);
    }

    fn transition(&self, from: TileState, to: TileState) -> TileResult<()> {
        self.state.transition(from, to).map_err(|actual| {
            invalid_state_error(&self.coordinate.to_string_key(), from.name(), actual)
        })?;
        self.record(to);
        Ok(())
    }

    /// Call with the tile mutex held whenever `cpu` or `gpu` changes
    fn publish_memory(&self, inner: &TileInner) {
        let cpu = inner.cpu.as_ref().map_or(0, |cpu| cpu.memory_usage());
        let gpu = inner.gpu.as_ref().map_or(0, |gpu| gpu.total_memory_usage());
        self.cpu_bytes.store(cpu, Ordering::Release);
        self.gpu_bytes.store(gpu, Ordering::Release);
    }

    fn fail(&self, inner: &mut TileInner, error: &EngineError) {
        log::warn!("[TerrainTile] Tile {} failed: {}", self.coordinate, error);
        inner.error = Some(error.to_string());
        inner.cpu = None;
        inner.gpu = None;
        self.publish_memory(inner);
        if self.state.force(TileState::Error) != TileState::Error {
            self.record(TileState::Error);
        }
    }

    /// Fetch the tile's samples from the cache or the loader.
    ///
    /// Only valid from `Empty` (or `Evicted`, which reloads like `Empty`).
    /// The loader runs without holding the tile mutex; if the tile is evicted
    /// meanwhile, the fresh data is discarded.
    pub fn load_data(&self, path: &Path, ctx: &TileLoadContext) -> TileResult<()> {
        if self.state.load() == TileState::Evicted {
            // Another thread may win this race, the Loading CAS below decides
            let _ = self.transition(TileState::Evicted, TileState::Empty);
        }
        self.transition(TileState::Empty, TileState::Loading)?;

        let start = Instant::now();
        let loaded = ctx.load_tile_data(&self.coordinate, &self.bounds(), path);

        let mut inner = self.inner.lock();
        match loaded {
            Ok(data) => {
                if let Err(actual) = self.state.transition(TileState::Loading, TileState::Loaded) {
                    log::debug!(
                        "[TerrainTile] Tile {} became {} while loading, discarding data",
                        self.coordinate,
                        actual
                    );
                    return Err(invalid_state_error(
                        &self.coordinate.to_string_key(),
                        TileState::Loading.name(),
                        actual,
                    ));
                }
                self.record(TileState::Loaded);

                let scale = data.height_scale;
                let bounds = self
                    .bounds()
                    .with_elevation(data.min_height * scale, data.max_height * scale);
                *self.bounds.write() = bounds;
                inner.cpu = Some(data);
                self.publish_memory(&inner);
                inner.error = None;
                inner.load_time = Some(start.elapsed());
                inner.loaded_at = Some(Instant::now());
                Ok(())
            }
            Err(error) => {
                // An eviction during the load already settled the state
                if self.state.load() == TileState::Loading {
                    self.fail(&mut inner, &error);
                }
                Err(error)
            }
        }
    }

    /// Build GPU resources from the loaded samples. Only valid from `Loaded`.
    pub fn upload_to_gpu(&self, ctx: &TileLoadContext) -> TileResult<()> {
        let mut inner = self.inner.lock();
        self.transition(TileState::Loaded, TileState::Uploading)?;

        let start = Instant::now();
        let result = match inner.cpu.clone() {
            Some(cpu) => self.create_gpu_resources(&cpu, ctx),
            None => Err(EngineError::InvalidState {
                resource: format!("tile {}", self.coordinate),
                expected: "CPU data".to_string(),
                actual: "none".to_string(),
            }),
        };

        match result {
            Ok(gpu) => {
                inner.gpu = Some(gpu);
                self.publish_memory(&inner);
                inner.upload_time = Some(start.elapsed());
                self.transition(TileState::Uploading, TileState::Ready)
            }
            Err(error) => {
                self.fail(&mut inner, &error);
                Err(error)
            }
        }
    }

    /// Load then upload, reporting the first failure
    pub fn load_and_upload(&self, path: &Path, ctx: &TileLoadContext) -> TileResult<()> {
        self.load_data(path, ctx)?;
        self.upload_to_gpu(ctx)
    }

    fn create_gpu_resources(
        &self,
        cpu: &TileCpuData,
        ctx: &TileLoadContext,
    ) -> TileResult<TileGpuResources> {
        let allocator = &ctx.allocator;
        let device = allocator.device();
        // Partially built resources are released by Drop on early return
        let mut gpu = TileGpuResources::new(Arc::clone(allocator));

        let vertices = base_grid_vertices(&self.bounds());
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = allocator.allocate_vertex_buffer(vertex_bytes.len() as u64)?;
        gpu.vertex_buffer = Some(Arc::clone(&vertex_buffer));
        if let Some(buffer) = vertex_buffer.resource().as_buffer() {
            device.write_buffer(buffer, 0, vertex_bytes)?;
        }

        let indices = patch_indices();
        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        let index_buffer = allocator.allocate_index_buffer(index_bytes.len() as u64)?;
        gpu.index_buffer = Some(Arc::clone(&index_buffer));
        if let Some(buffer) = index_buffer.resource().as_buffer() {
            device.write_buffer(buffer, 0, index_bytes)?;
        }

        let height_texture = allocator.allocate_texture_2d(
            cpu.width,
            cpu.height,
            ImageFormat::R32Float,
            TerrainMemoryType::HeightTexture,
        )?;
        gpu.height_texture = Some(Arc::clone(&height_texture));
        let height_image = height_texture.resource().as_image().ok_or_else(|| {
            EngineError::Internal {
                message: "height texture allocation is not an image".to_string(),
            }
        })?;
        device.write_image(height_image, 0, bytemuck::cast_slice(&cpu.heights))?;

        let mut bindings = vec![DescriptorBinding::SampledImage(height_image)];

        if !cpu.normals.is_empty() {
            let normal_texture = allocator.allocate_texture_2d(
                cpu.width,
                cpu.height,
                ImageFormat::Rgba32Float,
                TerrainMemoryType::NormalTexture,
            )?;
            gpu.normal_texture = Some(Arc::clone(&normal_texture));
            if let Some(normal_image) = normal_texture.resource().as_image() {
                let texels: Vec<[f32; 4]> =
                    cpu.normals.iter().map(|n| [n[0], n[1], n[2], 0.0]).collect();
                device.write_image(normal_image, 0, bytemuck::cast_slice(&texels))?;
                bindings.push(DescriptorBinding::SampledImage(normal_image));
            }
        }

        gpu.descriptor_set = Some(device.create_descriptor_set(&bindings)?);
        Ok(gpu)
    }

    /// Record the tile's draw. Fails without recording anything unless the
    /// tile is `Ready` with valid resources.
    pub fn render(
        &self,
        recorder: &mut dyn CommandRecorder,
        layout: PipelineLayoutHandle,
    ) -> TileResult<()> {
        let inner = self.inner.lock();
        let state = self.state.load();
        if state != TileState::Ready {
            return Err(invalid_state_error(
                &self.coordinate.to_string_key(),
                TileState::Ready.name(),
                state,
            ));
        }

        let gpu = inner.gpu.as_ref().filter(|gpu| gpu.is_valid());
        let handles = gpu.and_then(|gpu| {
            Some((
                gpu.vertex_buffer()?,
                gpu.index_buffer()?,
                gpu.descriptor_set()?,
            ))
        });
        let Some((vertex_buffer, index_buffer, descriptor_set)) = handles else {
            return Err(EngineError::ResourceNotFound {
                resource_type: "tile GPU resources".to_string(),
                id: self.coordinate.to_string_key(),
            });
        };

        recorder.bind_vertex_buffer(0, vertex_buffer, 0);
        recorder.bind_index_buffer(index_buffer, 0);
        recorder.bind_descriptor_set(layout, 0, descriptor_set);
        recorder.draw_indexed(PATCH_INDEX_COUNT, 1);

        if let Some(gpu) = gpu {
            gpu.touch();
        }
        Ok(())
    }

    /// Drop GPU resources but keep CPU samples. Only valid from `Ready`.
    pub fn unload_from_gpu(&self) -> TileResult<()> {
        let mut inner = self.inner.lock();
        self.transition(TileState::Ready, TileState::Loaded)?;
        inner.gpu = None;
        self.publish_memory(&inner);
        Ok(())
    }

    /// Release CPU and GPU resources. Valid from any state but `Error`.
    pub fn evict_from_memory(&self) -> TileResult<()> {
        let mut inner = self.inner.lock();
        let state = self.state.load();
        if state == TileState::Error {
            return Err(invalid_state_error(
                &self.coordinate.to_string_key(),
                "any state but Error",
                state,
            ));
        }

        inner.cpu = None;
        inner.gpu = None;
        self.publish_memory(&inner);
        if self.state.force(TileState::Evicted) != TileState::Evicted {
            self.record(TileState::Evicted);
        }
        Ok(())
    }

    pub fn has_error(&self) -> bool {
        self.state.load() == TileState::Error
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.load() == TileState::Ready
    }

    pub fn has_valid_gpu_resources(&self) -> bool {
        self.inner
            .lock()
            .gpu
            .as_ref()
            .is_some_and(|gpu| gpu.is_valid())
    }

    pub fn cpu_data(&self) -> Option<Arc<TileCpuData>> {
        self.inner.lock().cpu.clone()
    }

    pub fn load_time(&self) -> Option<Duration> {
        self.inner.lock().load_time
    }

    pub fn upload_time(&self) -> Option<Duration> {
        self.inner.lock().upload_time
    }

    /// Time since the samples arrived
    pub fn age(&self) -> Option<Duration> {
        self.inner.lock().loaded_at.map(|at| at.elapsed())
    }

    /// CPU plus GPU bytes. Never waits on the tile mutex.
    pub fn memory_usage(&self) -> u64 {
        self.cpu_memory_usage() + self.gpu_memory_usage()
    }

    pub fn cpu_memory_usage(&self) -> u64 {
        self.cpu_bytes.load(Ordering::Acquire)
    }

    pub fn gpu_memory_usage(&self) -> u64 {
        self.gpu_bytes.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: f32) {
        self.priority.store(priority.to_bits(), Ordering::Relaxed);
    }

    /// Nearer, finer and recently used tiles rank higher
    pub fn update_priority(&self, camera_position: Vec3) -> f32 {
        let distance = self.distance_to_camera(camera_position);
        let frames = self.frames_since_access() as f32;
        let level = self.coordinate.level as f32;

        let priority = PRIORITY_DISTANCE_WEIGHT / (distance + 1.0)
            + PRIORITY_LEVEL_WEIGHT * (PRIORITY_MAX_LEVEL - level)
            + PRIORITY_RECENCY_WEIGHT * (PRIORITY_RECENCY_WINDOW - frames).max(0.0);
        self.set_priority(priority);
        priority
    }

    /// Distance from the camera to the nearest point of the tile
    pub fn distance_to_camera(&self, camera_position: Vec3) -> f32 {
        self.bounds().distance_to_point(camera_position)
    }

    /// Distance mapped linearly onto `[0, MAX_LOD]`, clamped at near/far
    pub fn recommended_lod(&self, camera_position: Vec3, near: f32, far: f32) -> u32 {
        crate::culling::lod_for_distance(self.distance_to_camera(camera_position), near, far)
    }

    pub fn lod(&self) -> u32 {
        self.lod.load(Ordering::Relaxed)
    }

    pub fn update_lod(&self, camera_position: Vec3, near: f32, far: f32) -> u32 {
        let lod = self.recommended_lod(camera_position, near, far);
        self.lod.store(lod, Ordering::Relaxed);
        lod
    }

    pub fn is_visible(&self, frustum: &Frustum) -> bool {
        frustum.is_box_visible(&self.bounds())
    }

    pub fn frames_since_access(&self) -> u32 {
        self.frames_since_access.load(Ordering::Relaxed)
    }

    pub fn mark_accessed(&self) {
        self.frames_since_access.store(0, Ordering::Relaxed);
    }

    pub fn increment_frame_counter(&self) -> u32 {
        self.frames_since_access.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl std::fmt::Debug for TerrainTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainTile")
            .field("coordinate", &self.coordinate)
            .field("state", &self.state.load())
            .field("priority", &self.priority())
            .field("frames_since_access", &self.frames_since_access())
            .finish()
    }
}
