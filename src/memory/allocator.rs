/// Terrain Memory Allocator
///
/// Owns one `MemoryPool` per resource type, creates native resources through
/// the GPU device and watches overall usage. A background thread garbage
/// collects leaked allocations and runs time-capped defragmentation.
///
/// The allocator is constructed explicitly and shared as an `Arc`; there is
/// no process-wide instance.
use super::{
    allocation_error, MemoryAllocation, MemoryErrorContext, MemoryPool, MemoryResult,
    MemoryStats, PoolStats, TerrainMemoryConfig, TerrainMemoryType,
};
use crate::error::EngineError;
use crate::gpu::{BufferDescriptor, GpuDevice, ImageDescriptor, ImageFormat, NativeResource};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Usage level relative to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal = 0,
    Warning = 1,
    Critical = 2,
}

impl MemoryPressure {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => MemoryPressure::Critical,
            1 => MemoryPressure::Warning,
            _ => MemoryPressure::Normal,
        }
    }
}

/// Called with the new pressure level and the usage ratio
pub type PressureCallback = Arc<dyn Fn(MemoryPressure, f32) + Send + Sync>;
/// Called with the type and size of a request that could not be satisfied
pub type AllocationFailedCallback = Arc<dyn Fn(TerrainMemoryType, u64) + Send + Sync>;

/// What to create behind an allocation
enum ResourceRequest<'a> {
    Buffer(&'a BufferDescriptor),
    Image(&'a ImageDescriptor),
}

#[derive(Default)]
struct AllocationCounters {
    total_allocations: AtomicU64,
    total_deallocations: AtomicU64,
    failed_allocations: AtomicU64,
    leaked_allocations: AtomicU64,
    defragmentation_passes: AtomicU64,
    allocation_nanos: AtomicU64,
    deallocation_nanos: AtomicU64,
}

pub struct TerrainMemoryAllocator {
    device: Arc<dyn GpuDevice>,
    config: RwLock<TerrainMemoryConfig>,
    pools: RwLock<FxHashMap<TerrainMemoryType, Arc<MemoryPool>>>,
    /// Coarse lock for the published snapshot, separate from pool locks
    stats: Mutex<MemoryStats>,
    counters: AllocationCounters,
    used_total: AtomicU64,
    next_allocation_id: AtomicU64,
    next_pool_id: AtomicU32,
    pressure_level: AtomicU8,
    last_defrag: Mutex<Instant>,
    pressure_callback: RwLock<Option<PressureCallback>>,
    allocation_failed_callback: RwLock<Option<AllocationFailedCallback>>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Mutex<Option<ThreadId>>,
}

impl TerrainMemoryAllocator {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: TerrainMemoryConfig,
    ) -> MemoryResult<Arc<Self>> {
        config.validate()?;
        let start_background = config.enable_background_thread;
        let gc_interval = config.gc_interval;

        let allocator = Arc::new(Self {
            device,
            config: RwLock::new(config),
            pools: RwLock::new(FxHashMap::default()),
            stats: Mutex::new(MemoryStats::default()),
            counters: AllocationCounters::default(),
            used_total: AtomicU64::new(0),
            next_allocation_id: AtomicU64::new(1),
            next_pool_id: AtomicU32::new(0),
            pressure_level: AtomicU8::new(MemoryPressure::Normal as u8),
            last_defrag: Mutex::new(Instant::now()),
            pressure_callback: RwLock::new(None),
            allocation_failed_callback: RwLock::new(None),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            worker_id: Mutex::new(None),
        });

        if start_background {
            allocator.start_background_thread(gc_interval)?;
        }

        log::info!(
            "[TerrainMemory] Allocator ready on '{}' with {} budget",
            allocator.device.name(),
            super::format_bytes(allocator.config.read().max_total_memory)
        );
        Ok(allocator)
    }

    fn start_background_thread(self: &Arc<Self>, interval: Duration) -> MemoryResult<()> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = thread::Builder::new()
            .name("terrain-memory".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match weak.upgrade() {
                        Some(allocator) => allocator.background_tick(),
                        None => break,
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        *self.worker_id.lock() = Some(handle.thread().id());
        *self.worker.lock() = Some(handle);
        *self.shutdown.lock() = Some(shutdown_tx);
        Ok(())
    }

    /// Stop and join the background thread
    pub fn shutdown(&self) {
        if let Some(sender) = self.shutdown.lock().take() {
            let _ = sender.send(());
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // The last Arc can be dropped by the worker itself mid-tick
            if Some(thread::current().id()) != *self.worker_id.lock() {
                let _ = handle.join();
            }
        }
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn config(&self) -> TerrainMemoryConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. Existing pools keep their size until resized.
    pub fn update_config(&self, config: TerrainMemoryConfig) -> MemoryResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn set_pressure_callback(&self, callback: PressureCallback) {
        *self.pressure_callback.write() = Some(callback);
    }

    pub fn set_allocation_failed_callback(&self, callback: AllocationFailedCallback) {
        *self.allocation_failed_callback.write() = Some(callback);
    }

    // ---- allocation ----

    /// Allocate a buffer-backed resource of `size` bytes from the pool for `memory_type`
    pub fn allocate(
        &self,
        memory_type: TerrainMemoryType,
        size: u64,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        let usage = memory_type.buffer_usage().ok_or_else(|| EngineError::InvalidConfig {
            field: memory_type.name().to_string(),
            reason: "texture pools need dimensions, use allocate_texture_2d".to_string(),
        })?;
        let desc = BufferDescriptor {
            label: format!("terrain {}", memory_type),
            size,
            usage,
        };
        self.allocate_resource(memory_type, size, ResourceRequest::Buffer(&desc))
    }

    pub fn allocate_vertex_buffer(&self, size: u64) -> MemoryResult<Arc<MemoryAllocation>> {
        self.allocate(TerrainMemoryType::VertexBuffer, size)
    }

    pub fn allocate_index_buffer(&self, size: u64) -> MemoryResult<Arc<MemoryAllocation>> {
        self.allocate(TerrainMemoryType::IndexBuffer, size)
    }

    pub fn allocate_uniform_buffer(&self, size: u64) -> MemoryResult<Arc<MemoryAllocation>> {
        self.allocate(TerrainMemoryType::UniformBuffer, size)
    }

    pub fn allocate_staging_buffer(&self, size: u64) -> MemoryResult<Arc<MemoryAllocation>> {
        self.allocate(TerrainMemoryType::StagingBuffer, size)
    }

    pub fn allocate_texture_2d(
        &self,
        width: u32,
        height: u32,
        format: ImageFormat,
        memory_type: TerrainMemoryType,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        self.allocate_texture_2d_array(width, height, 1, format, memory_type)
    }

    pub fn allocate_texture_2d_array(
        &self,
        width: u32,
        height: u32,
        layers: u32,
        format: ImageFormat,
        memory_type: TerrainMemoryType,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        if !memory_type.is_texture() {
            return Err(EngineError::InvalidConfig {
                field: memory_type.name().to_string(),
                reason: "not a texture pool".to_string(),
            });
        }
        if width == 0 || height == 0 || layers == 0 {
            return Err(allocation_error(0, "texture dimensions must be non-zero"));
        }
        let desc = ImageDescriptor {
            label: format!("terrain {}", memory_type),
            width,
            height,
            layers,
            format,
        };
        let size = desc.byte_size();
        self.allocate_resource(memory_type, size, ResourceRequest::Image(&desc))
    }

    fn allocate_resource(
        &self,
        memory_type: TerrainMemoryType,
        size: u64,
        request: ResourceRequest<'_>,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        if size == 0 {
            return Err(allocation_error(0, "zero-sized allocation"));
        }
        let start = Instant::now();

        let result = match self.try_allocate(memory_type, size, &request) {
            Err(err) if err.is_out_of_memory() => {
                log::debug!(
                    "[TerrainMemory] {} request of {} failed ({}), collecting and retrying",
                    memory_type,
                    super::format_bytes(size),
                    err
                );
                self.garbage_collect();
                self.emergency_defragment();
                self.try_allocate(memory_type, size, &request)
            }
            other => other,
        };

        match result {
            Ok(allocation) => {
                self.counters.total_allocations.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .allocation_nanos
                    .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                self.check_memory_pressure(false);
                Ok(allocation)
            }
            Err(err) => {
                self.counters.failed_allocations.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[TerrainMemory] Failed to allocate {} from {} pool: {}",
                    super::format_bytes(size),
                    memory_type,
                    err
                );
                let callback = self.allocation_failed_callback.read().clone();
                if let Some(callback) = callback {
                    callback(memory_type, size);
                }
                Err(err)
            }
        }
    }

    fn try_allocate(
        &self,
        memory_type: TerrainMemoryType,
        size: u64,
        request: &ResourceRequest<'_>,
    ) -> MemoryResult<Arc<MemoryAllocation>> {
        let pool = self.pool_for(memory_type)?;
        let id = self.next_allocation_id.fetch_add(1, Ordering::Relaxed);
        let reservation = pool.reserve(id, size)?;

        // Native creation happens outside the pool lock
        let resource = match request {
            ResourceRequest::Buffer(desc) => self
                .device
                .create_buffer(desc)
                .map(NativeResource::Buffer),
            ResourceRequest::Image(desc) => {
                self.device.create_image(desc).map(NativeResource::Image)
            }
        };
        let resource = match resource.memory_context("allocate") {
            Ok(resource) => resource,
            Err(err) => {
                pool.cancel(reservation);
                return Err(err);
            }
        };

        self.used_total
            .fetch_add(reservation.aligned_size(), Ordering::AcqRel);
        Ok(pool.commit(reservation, resource))
    }

    /// Release an allocation and its native resource
    pub fn deallocate(&self, allocation: &MemoryAllocation) -> MemoryResult<()> {
        let start = Instant::now();
        let pool = self
            .pools
            .read()
            .get(&allocation.memory_type())
            .cloned()
            .ok_or_else(|| EngineError::ResourceNotFound {
                resource_type: "memory pool".to_string(),
                id: allocation.memory_type().name().to_string(),
            })?;

        let (resource, aligned_size) =
            pool.release(allocation.id())
                .ok_or_else(|| EngineError::ResourceNotFound {
                    resource_type: "allocation".to_string(),
                    id: allocation.id().to_string(),
                })?;
        self.destroy_native(resource);
        self.used_total.fetch_sub(aligned_size, Ordering::AcqRel);

        self.counters.total_deallocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deallocation_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.check_memory_pressure(false);
        Ok(())
    }

    fn destroy_native(&self, resource: NativeResource) {
        match resource {
            NativeResource::Buffer(buffer) => self.device.destroy_buffer(buffer),
            NativeResource::Image(image) => self.device.destroy_image(image),
        }
    }

    /// Get or lazily create the pool for `memory_type`
    fn pool_for(&self, memory_type: TerrainMemoryType) -> MemoryResult<Arc<MemoryPool>> {
        if let Some(pool) = self.pools.read().get(&memory_type) {
            return Ok(Arc::clone(pool));
        }

        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(&memory_type) {
            return Ok(Arc::clone(pool));
        }

        let config = self.config.read();
        let pool_config = config.pool_config(memory_type);
        let committed: u64 = pools.values().map(|pool| pool.total_size()).sum();
        let headroom = config.max_total_memory.saturating_sub(committed);

        let size = if pool_config.preferred_pool_size <= headroom {
            pool_config.preferred_pool_size
        } else if pool_config.min_pool_size <= headroom {
            pool_config.min_pool_size
        } else {
            return Err(super::out_of_memory_error(
                pool_config.min_pool_size as usize,
                headroom as usize,
            ));
        };

        let id = self.next_pool_id.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::new(MemoryPool::new(id, memory_type, pool_config, size));
        log::debug!(
            "[TerrainMemory] Created {} pool #{} with {}",
            memory_type,
            id,
            super::format_bytes(size)
        );
        pools.insert(memory_type, Arc::clone(&pool));
        Ok(pool)
    }

    /// Explicitly resize a pool, creating it first if needed.
    ///
    /// The sum of all pools must stay within `max_total_memory`.
    pub fn resize_pool(&self, memory_type: TerrainMemoryType, new_size: u64) -> MemoryResult<()> {
        let pool = self.pool_for(memory_type)?;
        let max_total = self.config.read().max_total_memory;
        let others: u64 = self
            .pools
            .read()
            .iter()
            .filter(|(&t, _)| t != memory_type)
            .map(|(_, pool)| pool.total_size())
            .sum();
        if others + new_size > max_total {
            return Err(super::out_of_memory_error(
                new_size as usize,
                max_total.saturating_sub(others) as usize,
            ));
        }
        pool.resize(new_size)
    }

    /// Grow a pool by its configured growth factor
    pub fn grow_pool(&self, memory_type: TerrainMemoryType) -> MemoryResult<u64> {
        let pool = self.pool_for(memory_type)?;
        let new_size = (pool.total_size() as f64 * pool.config().growth_factor as f64) as u64;
        self.resize_pool(memory_type, new_size)?;
        Ok(new_size)
    }

    // ---- maintenance ----

    /// Reclaim allocations whose handles were dropped. Returns how many.
    pub fn garbage_collect(&self) -> usize {
        let pools: Vec<Arc<MemoryPool>> = self.pools.read().values().cloned().collect();
        let mut reclaimed = 0;
        for pool in pools {
            for leaked in pool.collect_garbage() {
                self.destroy_native(leaked.resource);
                self.used_total.fetch_sub(leaked.aligned_size, Ordering::AcqRel);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            self.counters
                .leaked_allocations
                .fetch_add(reclaimed as u64, Ordering::Relaxed);
            log::warn!(
                "[TerrainMemory] Reclaimed {} allocations dropped without deallocation",
                reclaimed
            );
        }
        reclaimed
    }

    /// Defragment pools above the fragmentation threshold within `max_time`.
    /// Returns true if every pass finished.
    pub fn defragment(&self, max_time: Duration) -> bool {
        let threshold = self.config.read().defrag_threshold;
        self.defragment_pools(max_time, threshold)
    }

    /// Defragment every eligible pool regardless of threshold, with the emergency budget
    pub fn emergency_defragment(&self) -> bool {
        let budget = self.config.read().emergency_defrag_time;
        self.defragment_pools(budget, 0.0)
    }

    fn defragment_pools(&self, max_time: Duration, threshold: f32) -> bool {
        let deadline = Instant::now() + max_time;
        let pools: Vec<Arc<MemoryPool>> = self.pools.read().values().cloned().collect();
        let mut completed = true;
        for pool in pools {
            if !pool.config().enable_defragmentation || pool.fragmentation() <= threshold {
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            completed &= pool.defragment(remaining);
            self.counters
                .defragmentation_passes
                .fetch_add(1, Ordering::Relaxed);
        }
        completed
    }

    fn background_tick(&self) {
        self.garbage_collect();

        let (auto_defrag, interval, max_time) = {
            let config = self.config.read();
            (
                config.enable_auto_defrag,
                config.defrag_interval,
                config.max_defrag_time,
            )
        };
        if auto_defrag {
            let mut last = self.last_defrag.lock();
            if last.elapsed() >= interval {
                *last = Instant::now();
                drop(last);
                self.defragment(max_time);
            }
        }

        self.check_memory_pressure(true);
    }

    /// Re-evaluate pressure and fire callbacks on level changes.
    ///
    /// Critical pressure forces GC and an emergency defrag: on entry from the
    /// allocation path, and on every background tick while it lasts.
    fn check_memory_pressure(&self, from_background: bool) {
        let ratio = self.memory_usage_ratio();
        let (warning, critical) = {
            let config = self.config.read();
            (config.warning_threshold, config.critical_threshold)
        };
        let level = if ratio >= critical {
            MemoryPressure::Critical
        } else if ratio >= warning {
            MemoryPressure::Warning
        } else {
            MemoryPressure::Normal
        };

        let previous =
            MemoryPressure::from_u8(self.pressure_level.swap(level as u8, Ordering::AcqRel));
        let changed = previous != level;

        if changed {
            match level {
                MemoryPressure::Normal => {
                    log::info!("[TerrainMemory] Memory pressure relieved ({:.1}%)", ratio * 100.0)
                }
                _ => log::warn!(
                    "[TerrainMemory] Memory pressure {:?} at {:.1}% usage",
                    level,
                    ratio * 100.0
                ),
            }
            if level != MemoryPressure::Normal {
                let callback = self.pressure_callback.read().clone();
                if let Some(callback) = callback {
                    callback(level, ratio);
                }
            }
        }

        if level == MemoryPressure::Critical && (changed || from_background) {
            self.garbage_collect();
            self.emergency_defragment();
        }
    }

    // ---- queries ----

    pub fn memory_usage_ratio(&self) -> f32 {
        let max_total = self.config.read().max_total_memory;
        if max_total == 0 {
            return 0.0;
        }
        self.used_total.load(Ordering::Acquire) as f32 / max_total as f32
    }

    pub fn memory_pressure(&self) -> MemoryPressure {
        MemoryPressure::from_u8(self.pressure_level.load(Ordering::Acquire))
    }

    pub fn is_memory_pressure(&self) -> bool {
        self.memory_usage_ratio() >= self.config.read().warning_threshold
    }

    pub fn is_critical_memory_pressure(&self) -> bool {
        self.memory_usage_ratio() >= self.config.read().critical_threshold
    }

    /// Bytes in use across all pools
    pub fn used_memory(&self) -> u64 {
        self.used_total.load(Ordering::Acquire)
    }

    pub fn pool_stats(&self, memory_type: TerrainMemoryType) -> Option<PoolStats> {
        self.pools.read().get(&memory_type).map(|pool| pool.stats())
    }

    fn all_pool_stats(&self) -> Vec<PoolStats> {
        let pools: Vec<Arc<MemoryPool>> = self.pools.read().values().cloned().collect();
        let mut stats: Vec<PoolStats> = pools.iter().map(|pool| pool.stats()).collect();
        stats.sort_by_key(|pool| pool.memory_type);
        stats
    }

    /// Recompute and return the global snapshot
    pub fn stats(&self) -> MemoryStats {
        let pools = self.all_pool_stats();
        let mut stats = self.stats.lock();
        stats.absorb_pools(&pools);

        let allocations = self.counters.total_allocations.load(Ordering::Relaxed);
        let deallocations = self.counters.total_deallocations.load(Ordering::Relaxed);
        stats.total_allocations = allocations;
        stats.total_deallocations = deallocations;
        stats.failed_allocations = self.counters.failed_allocations.load(Ordering::Relaxed);
        stats.leaked_allocations = self.counters.leaked_allocations.load(Ordering::Relaxed);
        stats.defragmentation_passes =
            self.counters.defragmentation_passes.load(Ordering::Relaxed);
        stats.average_allocation_time = average(
            self.counters.allocation_nanos.load(Ordering::Relaxed),
            allocations,
        );
        stats.average_deallocation_time = average(
            self.counters.deallocation_nanos.load(Ordering::Relaxed),
            deallocations,
        );
        stats.usage_ratio = self.memory_usage_ratio();
        stats.clone()
    }

    pub fn reset_stats(&self) {
        let counters = &self.counters;
        for counter in [
            &counters.total_allocations,
            &counters.total_deallocations,
            &counters.failed_allocations,
            &counters.leaked_allocations,
            &counters.defragmentation_passes,
            &counters.allocation_nanos,
            &counters.deallocation_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.stats.lock() = MemoryStats::default();
    }

    pub fn memory_report(&self) -> Vec<String> {
        let stats = self.stats();
        stats.report_lines(&self.all_pool_stats())
    }
}

fn average(total_nanos: u64, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(total_nanos / count)
}

impl Drop for TerrainMemoryAllocator {
    fn drop(&mut self) {
        self.shutdown();
        let pools: Vec<Arc<MemoryPool>> = self.pools.read().values().cloned().collect();
        let live: usize = pools.iter().map(|pool| pool.active_allocations()).sum();
        if live > 0 {
            log::warn!(
                "[TerrainMemory] Allocator dropped with {} live allocations",
                live
            );
        }
    }
}
