use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use terrain_streamer::gpu::HeadlessDevice;
use terrain_streamer::memory::{TerrainMemoryAllocator, TerrainMemoryConfig};
use terrain_streamer::streaming::TerrainTileManager;
use terrain_streamer::tile::{
    SyntheticHeightmapLoader, SyntheticTerrainConfig, TerrainCache, TileBounds, TileCoordinate,
    TileLoadContext, TileState,
};

const TILE_SIZE: f32 = 128.0;

fn context() -> TileLoadContext {
    let allocator = TerrainMemoryAllocator::new(
        Arc::new(HeadlessDevice::new()),
        TerrainMemoryConfig {
            enable_background_thread: false,
            ..Default::default()
        },
    )
    .unwrap();
    let loader = SyntheticHeightmapLoader::new(SyntheticTerrainConfig {
        width: 64,
        height: 64,
        extent: 4096.0,
        ..Default::default()
    });
    TileLoadContext::new(
        Arc::new(loader),
        Arc::new(TerrainCache::new(16, 64)),
        allocator,
        16,
    )
}

fn coord(x: i32, y: i32) -> (TileCoordinate, TileBounds) {
    let coord = TileCoordinate::new(x, y, 0, "dem");
    let bounds = TileBounds::for_coordinate(&coord, TILE_SIZE, 0.0, 100.0);
    (coord, bounds)
}

#[test]
fn test_random_insertions_respect_tile_limit() {
    let manager = TerrainTileManager::new(24, u64::MAX);
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..500 {
        let (coord, bounds) = coord(rng.gen_range(0..20), rng.gen_range(0..20));
        let tile = manager.create_tile(coord.clone(), bounds);
        assert_eq!(tile.coordinate(), &coord);
        assert!(manager.contains(&coord));
        assert!(manager.tile_count() <= 24);

        if rng.gen_bool(0.3) {
            manager.advance_frame();
        }
    }
    assert!(manager.tiles_evicted() > 0);
}

#[test]
fn test_random_loads_respect_memory_limit() {
    let ctx = context();
    let path = Path::new("dem.synthetic");

    // Size of one resident tile at this resolution
    let sizing = TerrainTileManager::new(1, u64::MAX);
    let (sample_coord, sample_bounds) = coord(-1, -1);
    sizing
        .create_tile(sample_coord, sample_bounds)
        .load_and_upload(path, &ctx)
        .unwrap();
    let per_tile = sizing.total_memory_usage();
    assert!(per_tile > 0);
    sizing.remove_all_tiles();

    let budget = per_tile * 7 / 2;
    let manager = TerrainTileManager::new(1000, budget);
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..120 {
        let (coord, bounds) = coord(rng.gen_range(0..12), rng.gen_range(0..12));
        let tile = manager.create_tile(coord, bounds);
        if tile.state().needs_load() {
            tile.load_and_upload(path, &ctx).unwrap();
        }
        manager.enforce_limits();
        manager.advance_frame();

        assert!(manager.total_memory_usage() <= budget);
        assert!(manager.tile_count() <= 1000);
    }

    // Released tiles gave their allocations back
    manager.remove_all_tiles();
    assert_eq!(ctx.allocator.used_memory(), 0);
}

#[test]
fn test_cleanup_releases_least_recent_first() {
    let ctx = context();
    let path = Path::new("dem.synthetic");
    let manager = TerrainTileManager::new(100, u64::MAX);

    let mut coords = Vec::new();
    for x in 0..4 {
        let (coord, bounds) = coord(x, 0);
        manager
            .create_tile(coord.clone(), bounds)
            .load_and_upload(path, &ctx)
            .unwrap();
        coords.push(coord);
        manager.advance_frame();
    }
    let per_tile = manager.total_memory_usage() / 4;

    let released = manager.perform_memory_cleanup(per_tile * 2);
    assert_eq!(released, per_tile * 2);
    assert!(!manager.contains(&coords[0]));
    assert!(!manager.contains(&coords[1]));
    assert!(manager.contains(&coords[2]));
    assert!(manager.contains(&coords[3]));
    assert_eq!(
        manager.get_tile(&coords[3]).unwrap().state(),
        TileState::Ready
    );
}

#[test]
fn test_shrinking_limits_evicts_immediately() {
    let manager = TerrainTileManager::new(50, u64::MAX);
    for x in 0..30 {
        let (coord, bounds) = coord(x, 0);
        manager.create_tile(coord, bounds);
        manager.advance_frame();
    }
    assert_eq!(manager.tile_count(), 30);

    manager.set_max_tiles(10);
    assert_eq!(manager.tile_count(), 10);
    assert_eq!(manager.max_tiles(), 10);
    // The ten most recent survive
    for x in 20..30 {
        assert!(manager.contains(&coord(x, 0).0));
    }
}
