//! Per-frame terrain orchestration
//!
//! `render` runs cull, stream update and draw in that order each call.
//! Tiles are created lazily by culling; background loaders fill them and
//! a frame only ever draws tiles that are already `Ready`.

use super::{
    dataset_not_found_error, invalid_config_error, RenderStats, RendererErrorContext,
    RendererResult, SceneObject, TerrainPushConstants, TerrainRenderConfig, VisualizationMode,
};
use crate::camera::{build_frustum, camera_position, TerrainCamera};
use crate::culling::{generate_visible_candidates, CandidateParams, CullingBackend, Frustum};
use crate::gpu::{CommandRecorder, PipelineHandle, PipelineLayoutHandle, WgpuDevice};
use crate::memory::{MemoryPressure, TerrainMemoryAllocator};
use crate::streaming::{
    DatasetInfo, DatasetRegistry, LoadQueue, StreamingConfig, StreamingShared, StreamingStats,
    StreamingWorkers, TerrainTileManager,
};
use crate::tile::{
    HeightmapLoader, TerrainCache, TerrainTile, TileBounds, TileCoordinate, TileLoadContext,
    TileState, MAX_LOD, VERTICES_PER_SIDE,
};
use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Pipelines built by the GPU layer that terrain draws bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrainPipelines {
    pub solid: PipelineHandle,
    pub wireframe: PipelineHandle,
    pub layout: PipelineLayoutHandle,
}

/// Snapshot of one `render` call, dropped when it returns
pub struct RenderFrame {
    pub camera: TerrainCamera,
    pub frustum: Frustum,
    /// Counted references keep each tile alive while its draw is recorded
    pub visible_tiles: Vec<Arc<TerrainTile>>,
    pub frame_index: u64,
}

#[derive(Debug, Default)]
struct CullingCounts {
    candidates: u32,
    culled: u32,
    loading: u32,
    failed: u32,
}

#[derive(Debug, Default)]
struct DrawCounts {
    draw_calls: u32,
    triangles: u64,
    skipped: u32,
}

pub struct TerrainRenderer {
    config: RwLock<TerrainRenderConfig>,
    pending_config: Mutex<Option<TerrainRenderConfig>>,
    pipelines: TerrainPipelines,
    allocator: Arc<TerrainMemoryAllocator>,
    shared: Arc<StreamingShared>,
    workers: Mutex<Option<StreamingWorkers>>,
    datasets: DatasetRegistry,
    active_dataset: RwLock<Option<Arc<str>>>,
    cpu_culling: CullingBackend,
    gpu_culling: Option<CullingBackend>,
    stats: Mutex<RenderStats>,
    frame_counter: AtomicU64,
    elapsed: Mutex<f32>,
    viewport: Mutex<(u32, u32)>,
    visualization_mode: Mutex<VisualizationMode>,
}

impl TerrainRenderer {
    /// Build the renderer and start its loader and streaming threads
    pub fn new(
        allocator: Arc<TerrainMemoryAllocator>,
        loader: Arc<dyn HeightmapLoader>,
        pipelines: TerrainPipelines,
        config: TerrainRenderConfig,
    ) -> RendererResult<Self> {
        config.validate()?;

        let cache = Arc::new(TerrainCache::new(
            config.cache_size_mb,
            config.max_tiles.saturating_mul(2),
        ));
        let mut context =
            TileLoadContext::new(loader, cache, Arc::clone(&allocator), config.tile_resolution);
        context.height_scale = config.height_scale;

        let shared = Arc::new(StreamingShared::new(
            Arc::new(TerrainTileManager::new(config.max_tiles, config.max_tile_memory)),
            Arc::new(LoadQueue::new()),
            context,
        ));

        let weak: Weak<StreamingShared> = Arc::downgrade(&shared);
        allocator.set_pressure_callback(Arc::new(move |level, ratio| {
            if level != MemoryPressure::Normal {
                if let Some(shared) = weak.upgrade() {
                    log::debug!(
                        "[TerrainRenderer] Requesting tile cleanup at {:.1}% usage",
                        ratio * 100.0
                    );
                    shared.request_cleanup();
                }
            }
        }));

        let workers = StreamingWorkers::start(
            Arc::clone(&shared),
            StreamingConfig {
                loader_threads: config.loader_threads,
                eviction_frames: config.eviction_frames,
                ..Default::default()
            },
        )
        .renderer_context("start streaming workers")?;

        log::info!(
            "[TerrainRenderer] Initialized: tile size {}, {} samples per edge, {} loader threads",
            config.tile_size,
            config.tile_resolution,
            workers.loader_threads()
        );

        Ok(Self {
            config: RwLock::new(config),
            pending_config: Mutex::new(None),
            pipelines,
            allocator,
            shared,
            workers: Mutex::new(Some(workers)),
            datasets: DatasetRegistry::new(),
            active_dataset: RwLock::new(None),
            cpu_culling: CullingBackend::cpu(),
            gpu_culling: None,
            stats: Mutex::new(RenderStats::default()),
            frame_counter: AtomicU64::new(0),
            elapsed: Mutex::new(0.0),
            viewport: Mutex::new((1, 1)),
            visualization_mode: Mutex::new(VisualizationMode::Shaded),
        })
    }

    /// Build the compute culling backend on `device`; used while
    /// `enable_gpu_culling` is set, falls back to the CPU on failure
    pub fn attach_gpu_culling(&mut self, device: &WgpuDevice) {
        let backend = CullingBackend::gpu(Some((
            Arc::clone(device.device()),
            Arc::clone(device.queue()),
        )));
        log::info!("[TerrainRenderer] Culling backend: {}", backend.name());
        self.gpu_culling = Some(backend);
    }

    pub fn culling_backend_name(&self) -> &'static str {
        self.culling_backend(&self.config.read()).name()
    }

    fn culling_backend(&self, config: &TerrainRenderConfig) -> &CullingBackend {
        match &self.gpu_culling {
            Some(backend) if config.enable_gpu_culling => backend,
            _ => &self.cpu_culling,
        }
    }

    // ---- datasets ----

    /// Load a dataset and register it under `id`. The first dataset loaded
    /// becomes the active one.
    pub fn load_dataset(&self, id: &str, path: impl Into<PathBuf>) -> RendererResult<Arc<DatasetInfo>> {
        let path = path.into();
        if self.datasets.get(id).is_some() {
            self.drop_dataset_tiles(id);
        }

        let heightmap = self.shared.context.dataset(&path)?;
        let info = self.datasets.register(id, path, heightmap.bounds);

        let mut active = self.active_dataset.write();
        if active.is_none() {
            *active = Some(Arc::clone(&info.id));
        }
        log::info!(
            "[TerrainRenderer] Loaded dataset '{}' from {} ({}x{} samples)",
            id,
            info.path.display(),
            heightmap.width,
            heightmap.height
        );
        Ok(info)
    }

    /// Drop a dataset and every tile cut from it
    pub fn unload_dataset(&self, id: &str) -> bool {
        let Some(info) = self.datasets.unregister(id) else {
            return false;
        };
        let removed = self.drop_dataset_tiles(id);
        self.shared.context.cache.remove_heightmap(&info.path);

        let mut active = self.active_dataset.write();
        if active.as_deref() == Some(id) {
            *active = self.datasets.ids().into_iter().next();
        }
        log::info!(
            "[TerrainRenderer] Unloaded dataset '{}' ({} tiles released)",
            id,
            removed
        );
        true
    }

    fn drop_dataset_tiles(&self, id: &str) -> usize {
        self.shared
            .queue
            .retain(|request| &*request.coordinate.dataset_id != id);
        self.shared.context.cache.remove_dataset(id);
        self.shared.manager.remove_dataset(id)
    }

    pub fn set_active_dataset(&self, id: &str) -> RendererResult<()> {
        let info = self
            .datasets
            .get(id)
            .ok_or_else(|| dataset_not_found_error(id))?;
        *self.active_dataset.write() = Some(Arc::clone(&info.id));
        Ok(())
    }

    pub fn active_dataset(&self) -> Option<Arc<DatasetInfo>> {
        let id = self.active_dataset.read().clone()?;
        self.datasets.get(&id)
    }

    pub fn dataset_ids(&self) -> Vec<Arc<str>> {
        self.datasets.ids()
    }

    // ---- frame ----

    /// Cull, update streaming and record the visible tiles into `recorder`
    pub fn render(
        &self,
        camera: &TerrainCamera,
        recorder: &mut dyn CommandRecorder,
    ) -> RendererResult<RenderStats> {
        let frame_start = Instant::now();
        self.apply_pending_config();
        let config = self.config.read().clone();

        let mut frame = RenderFrame {
            camera: *camera,
            frustum: build_frustum(camera),
            visible_tiles: Vec::new(),
            frame_index: self.frame_counter.fetch_add(1, Ordering::Relaxed),
        };

        self.shared.manager.advance_frame();

        let culling_start = Instant::now();
        let counts = self.perform_culling(&mut frame, &config);
        let culling_time = culling_start.elapsed();

        self.update_tile_streaming(&frame, &config);

        let render_start = Instant::now();
        let draws = self.render_tiles(&frame, recorder, &config);
        let render_time = render_start.elapsed();

        let stats = RenderStats {
            frame_index: frame.frame_index,
            tiles_rendered: draws.draw_calls,
            tiles_culled: counts.culled,
            tiles_loading: counts.loading,
            tiles_failed: counts.failed + draws.skipped,
            candidate_tiles: counts.candidates,
            draw_calls: draws.draw_calls,
            triangles_rendered: draws.triangles,
            frame_time_ms: millis(frame_start.elapsed()),
            culling_time_ms: millis(culling_time),
            render_time_ms: millis(render_time),
            memory_usage: self.shared.manager.total_memory_usage(),
            gpu_memory_usage: self.shared.manager.total_gpu_memory_usage(),
        };
        log::debug!("[TerrainRenderer] {}", stats.summary());
        *self.stats.lock() = stats.clone();
        Ok(stats)
    }

    /// Select this frame's tiles; missing ones are created so the streaming
    /// update can queue them
    fn perform_culling(&self, frame: &mut RenderFrame, config: &TerrainRenderConfig) -> CullingCounts {
        let mut counts = CullingCounts::default();
        let Some(dataset) = self.active_dataset() else {
            log::trace!("[TerrainRenderer] No active dataset, nothing to cull");
            return counts;
        };

        let eye = camera_position(&frame.camera);
        let params = CandidateParams {
            tile_size: config.tile_size,
            near_distance: config.near_distance,
            max_distance: frame.camera.zfar.min(config.far_distance),
            max_visible_tiles: config.max_visible_tiles,
            min_elevation: dataset.bounds.min.y,
            max_elevation: dataset.bounds.max.y,
            dataset_bounds: Some(dataset.bounds),
        };
        let frustum = config.enable_frustum_culling.then_some(&frame.frustum);
        let (selected, total) = generate_visible_candidates(
            frustum,
            eye,
            &params,
            &dataset.id,
            self.culling_backend(config),
        );

        counts.candidates = total as u32;
        counts.culled = (total - selected.len()) as u32;

        let manager = &self.shared.manager;
        for candidate in selected {
            let tile = match manager.get_tile(&candidate.coordinate) {
                Some(tile) => tile,
                None => manager.create_tile(candidate.coordinate, candidate.bounds),
            };
            tile.mark_accessed();
            match tile.state() {
                TileState::Ready => frame.visible_tiles.push(tile),
                TileState::Error => counts.failed += 1,
                _ => counts.loading += 1,
            }
        }
        counts
    }

    /// Reprioritize and hand the most urgent missing tiles to the loaders
    fn update_tile_streaming(&self, frame: &RenderFrame, config: &TerrainRenderConfig) {
        let eye = camera_position(&frame.camera);
        let manager = &self.shared.manager;
        let queue = &self.shared.queue;

        manager.update_priorities(eye);

        let lookahead = config.loads_per_frame + queue.len() + queue.in_flight();
        let mut scheduled = 0;
        for coord in manager.get_high_priority_loading_queue(lookahead) {
            if scheduled == config.loads_per_frame {
                break;
            }
            if queue.contains(&coord) {
                continue;
            }
            let Some(dataset) = self.datasets.get(&coord.dataset_id) else {
                continue;
            };
            if queue.push(coord, Arc::clone(&dataset.path)) {
                scheduled += 1;
            }
        }
        if scheduled > 0 {
            log::trace!("[TerrainRenderer] Scheduled {} tile loads", scheduled);
        }
    }

    /// Bind the pipeline once and draw each visible tile, skipping any that
    /// fail validation
    fn render_tiles(
        &self,
        frame: &RenderFrame,
        recorder: &mut dyn CommandRecorder,
        config: &TerrainRenderConfig,
    ) -> DrawCounts {
        let mut counts = DrawCounts::default();
        if frame.visible_tiles.is_empty() {
            return counts;
        }

        let pipeline = if config.enable_wireframe {
            self.pipelines.wireframe
        } else {
            self.pipelines.solid
        };
        recorder.bind_pipeline(pipeline);

        let eye = camera_position(&frame.camera);
        let time = *self.elapsed.lock();
        let mode = *self.visualization_mode.lock();

        for tile in &frame.visible_tiles {
            if !tile.has_valid_gpu_resources() {
                counts.skipped += 1;
                continue;
            }
            let lod = tile.update_lod(eye, config.near_distance, config.far_distance);
            let constants =
                TerrainPushConstants::new(&frame.camera, config, &tile.bounds(), time, mode);
            recorder.push_constants(self.pipelines.layout, 0, constants.as_bytes());

            match tile.render(recorder, self.pipelines.layout) {
                Ok(()) => {
                    counts.draw_calls += 1;
                    counts.triangles += estimated_triangles(lod, config);
                }
                Err(e) => {
                    counts.skipped += 1;
                    log::debug!("[TerrainRenderer] Skipped tile {}: {}", tile.coordinate(), e);
                }
            }
        }
        counts
    }

    /// Run queued loads on the calling thread until nothing is pending or
    /// in flight, or `timeout` passes
    pub fn flush_loads(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let queue = &self.shared.queue;
            if queue.is_empty() && queue.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if !self.shared.process_next() {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    // ---- configuration ----

    pub fn config(&self) -> TerrainRenderConfig {
        self.config.read().clone()
    }

    /// Validate now, apply at the start of the next frame
    pub fn update_config(&self, config: TerrainRenderConfig) -> RendererResult<()> {
        config.validate()?;
        if let Some(field) = self.config.read().fixed_field_change(&config) {
            return Err(invalid_config_error(
                field,
                "only takes effect when the renderer is created",
            ));
        }
        *self.pending_config.lock() = Some(config);
        Ok(())
    }

    fn apply_pending_config(&self) {
        let Some(next) = self.pending_config.lock().take() else {
            return;
        };
        let previous = std::mem::replace(&mut *self.config.write(), next.clone());

        if previous.tile_size != next.tile_size {
            // Coordinates now name different ground
            let removed = self.shared.manager.remove_all_tiles();
            self.shared.queue.clear();
            self.shared.context.cache.clear();
            log::info!(
                "[TerrainRenderer] Tile size changed to {}, released {} tiles",
                next.tile_size,
                removed
            );
        }
        if previous.max_tiles != next.max_tiles {
            self.shared.manager.set_max_tiles(next.max_tiles);
        }
        if previous.max_tile_memory != next.max_tile_memory {
            self.shared.manager.set_max_memory_usage(next.max_tile_memory);
        }
        log::debug!("[TerrainRenderer] Applied configuration update");
    }

    pub fn set_visualization_mode(&self, mode: VisualizationMode) {
        *self.visualization_mode.lock() = mode;
    }

    pub fn set_viewport(&self, width: u32, height: u32) {
        *self.viewport.lock() = (width.max(1), height.max(1));
    }

    pub fn viewport(&self) -> (u32, u32) {
        *self.viewport.lock()
    }

    // ---- queries ----

    pub fn get_stats(&self) -> RenderStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = RenderStats::default();
    }

    pub fn streaming_stats(&self) -> StreamingStats {
        match self.workers.lock().as_ref() {
            Some(workers) => workers.stats(),
            None => self.shared.stats(),
        }
    }

    pub fn tile_manager(&self) -> &Arc<TerrainTileManager> {
        &self.shared.manager
    }

    pub fn allocator(&self) -> &Arc<TerrainMemoryAllocator> {
        &self.allocator
    }

    /// Terrain height under `(x, z)` in the active dataset
    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let dataset = self.active_dataset()?;
        let heightmap = self.shared.context.dataset(&dataset.path).ok()?;
        heightmap
            .contains_xz(x, z)
            .then(|| heightmap.sample(x, z) * self.shared.context.height_scale)
    }

    /// Tile of the active dataset containing `position` at `level`
    pub fn world_to_tile(&self, position: Vec3, level: u32) -> Option<TileCoordinate> {
        let id = self.active_dataset.read().clone()?;
        Some(TileCoordinate::from_world(
            position,
            level.min(MAX_LOD),
            self.config.read().tile_size,
            id,
        ))
    }

    /// Stop the loader and streaming threads
    pub fn shutdown(&self) {
        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.shutdown();
            log::info!("[TerrainRenderer] Shut down");
        }
    }
}

impl SceneObject for TerrainRenderer {
    fn update(&mut self, dt: f32) {
        *self.elapsed.lock() += dt;
    }

    fn render(
        &mut self,
        recorder: &mut dyn CommandRecorder,
        camera: &TerrainCamera,
    ) -> RendererResult<()> {
        TerrainRenderer::render(self, camera, recorder).map(|_| ())
    }

    fn bounding_box(&self) -> TileBounds {
        self.active_dataset()
            .map(|dataset| dataset.bounds)
            .unwrap_or_default()
    }
}

impl Drop for TerrainRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn millis(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1000.0
}

/// Triangles produced by tessellating every patch of one tile at the level
/// its LOD band maps to
fn estimated_triangles(lod: u32, config: &TerrainRenderConfig) -> u64 {
    let t = lod.min(MAX_LOD) as f32 / MAX_LOD as f32;
    let level = config.max_tess_level + (config.min_tess_level - config.max_tess_level) * t;
    let level = (level * config.tessellation_scale).max(1.0);
    let patches = ((VERTICES_PER_SIDE - 1) * (VERTICES_PER_SIDE - 1)) as u64;
    patches * 2 * (level * level).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_estimate_follows_lod() {
        let config = TerrainRenderConfig::default();
        let near = estimated_triangles(0, &config);
        let far = estimated_triangles(MAX_LOD, &config);
        let patches = ((VERTICES_PER_SIDE - 1) * (VERTICES_PER_SIDE - 1)) as u64;
        assert_eq!(near, patches * 2 * 64 * 64);
        assert_eq!(far, patches * 2);
        assert!(estimated_triangles(3, &config) < near);
    }
}
