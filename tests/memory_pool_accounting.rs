use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use terrain_streamer::gpu::{HeadlessDevice, ImageFormat};
use terrain_streamer::memory::{
    align_size, MemoryAllocation, MemoryPressure, TerrainMemoryAllocator, TerrainMemoryConfig,
    TerrainMemoryType,
};

fn allocator(config: TerrainMemoryConfig) -> (Arc<HeadlessDevice>, Arc<TerrainMemoryAllocator>) {
    let device = Arc::new(HeadlessDevice::new());
    let allocator = TerrainMemoryAllocator::new(
        device.clone(),
        TerrainMemoryConfig {
            enable_background_thread: false,
            ..config
        },
    )
    .unwrap();
    (device, allocator)
}

#[test]
fn test_used_bytes_track_aligned_sizes() {
    let (device, allocator) = allocator(TerrainMemoryConfig::default());
    let size = 1000;
    let count = 10;

    let allocations: Vec<_> = (0..count)
        .map(|_| allocator.allocate_vertex_buffer(size).unwrap())
        .collect();

    let alignment = allocations[0].alignment();
    let expected = count * align_size(size, alignment);
    let pool = allocator.pool_stats(TerrainMemoryType::VertexBuffer).unwrap();
    assert_eq!(pool.used_size, expected);
    assert_eq!(pool.active_allocations, count as usize);
    assert_eq!(allocator.used_memory(), expected);
    assert_eq!(device.live_buffers(), count as usize);

    for allocation in &allocations {
        assert_eq!(allocation.size(), size);
        assert_eq!(allocation.offset() % alignment, 0);
    }

    for allocation in &allocations {
        allocator.deallocate(allocation).unwrap();
    }
    let pool = allocator.pool_stats(TerrainMemoryType::VertexBuffer).unwrap();
    assert_eq!(pool.used_size, 0);
    assert_eq!(allocator.used_memory(), 0);
    assert_eq!(device.live_buffers(), 0);

    let stats = allocator.stats();
    assert_eq!(stats.total_allocations, count);
    assert_eq!(stats.total_deallocations, count);
}

#[test]
fn test_double_free_is_rejected() {
    let (_device, allocator) = allocator(TerrainMemoryConfig::default());
    let allocation = allocator.allocate_index_buffer(4096).unwrap();

    allocator.deallocate(&allocation).unwrap();
    assert!(allocator.deallocate(&allocation).is_err());
    assert_eq!(allocator.used_memory(), 0);
}

#[test]
fn test_textures_land_in_their_own_pools() {
    let (device, allocator) = allocator(TerrainMemoryConfig::default());

    let heights = allocator
        .allocate_texture_2d(64, 64, ImageFormat::R32Float, TerrainMemoryType::HeightTexture)
        .unwrap();
    let normals = allocator
        .allocate_texture_2d(64, 64, ImageFormat::Rgba32Float, TerrainMemoryType::NormalTexture)
        .unwrap();

    assert!(heights.resource().as_image().is_some());
    assert_eq!(heights.size(), 64 * 64 * 4);
    assert_eq!(normals.size(), 64 * 64 * 16);
    assert_eq!(device.live_images(), 2);
    assert_eq!(
        allocator.used_memory(),
        heights.aligned_size() + normals.aligned_size()
    );

    // Texture pools need dimensions
    assert!(allocator
        .allocate(TerrainMemoryType::HeightTexture, 1024)
        .is_err());
}

#[test]
fn test_pressure_callback_reports_levels() {
    let config = TerrainMemoryConfig {
        max_total_memory: 1024 * 1024,
        ..Default::default()
    }
    .scale_pools(1.0 / 128.0);
    let (_device, allocator) = allocator(config);

    let seen: Arc<Mutex<Vec<MemoryPressure>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    allocator.set_pressure_callback(Arc::new(move |level, _ratio| sink.lock().push(level)));

    let first = allocator.allocate_vertex_buffer(900 * 1024).unwrap();
    assert_eq!(allocator.memory_pressure(), MemoryPressure::Warning);
    assert!(allocator.is_memory_pressure());

    let second = allocator.allocate_vertex_buffer(100 * 1024).unwrap();
    assert_eq!(allocator.memory_pressure(), MemoryPressure::Critical);
    assert!(allocator.is_critical_memory_pressure());

    assert!(allocator.allocate_vertex_buffer(100 * 1024).is_err());
    assert_eq!(allocator.stats().failed_allocations, 1);

    // Dropping back through Warning notifies again, Normal does not
    allocator.deallocate(&second).unwrap();
    allocator.deallocate(&first).unwrap();
    assert_eq!(allocator.memory_pressure(), MemoryPressure::Normal);

    assert_eq!(
        *seen.lock(),
        vec![
            MemoryPressure::Warning,
            MemoryPressure::Critical,
            MemoryPressure::Warning
        ]
    );
}

#[test]
fn test_dropped_handles_are_collected() {
    let (device, allocator) = allocator(TerrainMemoryConfig::default());
    let kept = allocator.allocate_uniform_buffer(256).unwrap();
    drop(allocator.allocate_uniform_buffer(256).unwrap());

    assert_eq!(allocator.garbage_collect(), 1);
    assert_eq!(allocator.used_memory(), kept.aligned_size());
    assert_eq!(device.live_buffers(), 1);
    assert_eq!(allocator.stats().leaked_allocations, 1);
}

fn assert_disjoint(allocations: &[Arc<MemoryAllocation>]) {
    let mut ranges: Vec<(u32, u64, u64)> = allocations
        .iter()
        .map(|a| (a.pool_id(), a.offset(), a.offset() + a.aligned_size()))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        if pair[0].0 == pair[1].0 {
            assert!(
                pair[0].2 <= pair[1].1,
                "overlapping placements {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn test_concurrent_allocation_and_defragmentation_never_overlap() {
    let config = TerrainMemoryConfig {
        max_total_memory: 4 * 1024 * 1024,
        ..Default::default()
    }
    .scale_pools(1.0 / 128.0);
    let (device, allocator) = allocator(config);
    let stop = Arc::new(AtomicBool::new(false));

    let defragmenter = {
        let allocator = Arc::clone(&allocator);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut passes = 0u32;
            while !stop.load(Ordering::Relaxed) {
                allocator.emergency_defragment();
                allocator.defragment(Duration::from_micros(50));
                passes += 1;
                thread::yield_now();
            }
            passes
        })
    };

    let workers: Vec<_> = (0..4u64)
        .map(|seed| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut live: Vec<Arc<MemoryAllocation>> = Vec::new();
                for _ in 0..2000 {
                    if !live.is_empty() && rng.gen_bool(0.45) {
                        let victim = live.swap_remove(rng.gen_range(0..live.len()));
                        allocator.deallocate(&victim).unwrap();
                        continue;
                    }
                    let size = rng.gen_range(1..16 * 1024);
                    let result = if rng.gen_bool(0.5) {
                        allocator.allocate_vertex_buffer(size)
                    } else {
                        allocator.allocate_index_buffer(size)
                    };
                    // Full pools are expected under this load
                    if let Ok(allocation) = result {
                        live.push(allocation);
                    }
                }
                live
            })
        })
        .collect();

    let live: Vec<Arc<MemoryAllocation>> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    stop.store(true, Ordering::Relaxed);
    assert!(defragmenter.join().unwrap() > 0);

    assert_disjoint(&live);
    let expected: u64 = live.iter().map(|a| a.aligned_size()).sum();
    assert_eq!(allocator.used_memory(), expected);
    for memory_type in [TerrainMemoryType::VertexBuffer, TerrainMemoryType::IndexBuffer] {
        let pool = allocator.pool_stats(memory_type).unwrap();
        let in_pool: u64 = live
            .iter()
            .filter(|a| a.memory_type() == memory_type)
            .map(|a| a.aligned_size())
            .sum();
        assert_eq!(pool.used_size, in_pool);
    }

    // A final compaction must still leave every placement distinct
    allocator.emergency_defragment();
    assert_disjoint(&live);

    for allocation in &live {
        allocator.deallocate(allocation).unwrap();
    }
    assert_eq!(allocator.used_memory(), 0);
    assert_eq!(device.live_buffers(), 0);
}
