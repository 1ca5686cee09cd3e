use glam::Vec3;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use terrain_streamer::camera::{init_camera_at, transform, TerrainCamera};
use terrain_streamer::gpu::{
    CommandList, HeadlessDevice, PipelineHandle, PipelineLayoutHandle, RecordedCommand,
};
use terrain_streamer::tile::{SyntheticHeightmapLoader, SyntheticTerrainConfig, TileCoordinate};
use terrain_streamer::{
    EngineError, TerrainMemoryConfig, TerrainPipelines, TerrainRenderConfig, TerrainStreamer,
};

const PIPELINES: TerrainPipelines = TerrainPipelines {
    solid: PipelineHandle(1),
    wireframe: PipelineHandle(2),
    layout: PipelineLayoutHandle(3),
};

fn test_config() -> TerrainRenderConfig {
    TerrainRenderConfig {
        tile_size: 256.0,
        tile_resolution: 17,
        near_distance: 256.0,
        far_distance: 3000.0,
        loader_threads: 1,
        ..Default::default()
    }
}

fn streamer(config: TerrainRenderConfig) -> TerrainStreamer {
    let loader = SyntheticHeightmapLoader::new(SyntheticTerrainConfig {
        width: 256,
        height: 256,
        extent: 4096.0,
        ..Default::default()
    });
    TerrainStreamer::new(
        Arc::new(HeadlessDevice::new()),
        Arc::new(loader),
        PIPELINES,
        config,
        TerrainMemoryConfig {
            enable_background_thread: false,
            ..Default::default()
        },
    )
    .unwrap()
}

/// Above the middle of the dataset, looking north and down
fn overview_camera() -> TerrainCamera {
    let camera = init_camera_at(Vec3::new(2048.0, 400.0, 3000.0), 1280, 720);
    transform::look_at(&camera, Vec3::new(2048.0, 0.0, 1500.0))
}

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_tiles_stream_in_and_draw() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();
    renderer.load_dataset("dem", "dem.synthetic").unwrap();
    let camera = overview_camera();
    let mut commands = CommandList::new();

    let first = renderer.render(&camera, &mut commands).unwrap();
    assert!(first.candidate_tiles > 0);
    assert!(first.tiles_loading > 0);
    assert_eq!(first.draw_calls, 0);
    assert_eq!(commands.draw_calls(), 0);

    assert!(renderer.flush_loads(FLUSH_TIMEOUT));

    commands.clear();
    let second = renderer.render(&camera, &mut commands).unwrap();
    assert!(second.tiles_rendered > 0);
    assert_eq!(second.draw_calls, second.tiles_rendered);
    assert_eq!(commands.draw_calls(), second.draw_calls as usize);
    assert_eq!(commands.pipeline_binds(), 1);
    assert_eq!(
        commands.commands()[0],
        RecordedCommand::BindPipeline(PIPELINES.solid)
    );
    assert!(second.triangles_rendered > 0);
    assert!(second.memory_usage >= second.gpu_memory_usage);
    assert!(second.gpu_memory_usage > 0);
    assert_eq!(second.frame_index, first.frame_index + 1);

    assert!(renderer.streaming_stats().tiles_loaded >= second.tiles_rendered as u64);
    assert_eq!(renderer.get_stats(), second);
}

#[test]
fn test_every_selected_tile_eventually_draws() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();
    renderer.load_dataset("dem", "dem.synthetic").unwrap();
    let camera = overview_camera();
    let mut commands = CommandList::new();

    let mut settled = None;
    for _ in 0..64 {
        commands.clear();
        let stats = renderer.render(&camera, &mut commands).unwrap();
        let selected = stats.candidate_tiles - stats.tiles_culled;
        assert_eq!(
            stats.tiles_rendered + stats.tiles_loading + stats.tiles_failed,
            selected
        );
        if stats.tiles_loading == 0 && stats.tiles_rendered > 0 {
            settled = Some(stats);
            break;
        }
        assert!(renderer.flush_loads(FLUSH_TIMEOUT));
    }

    let stats = settled.expect("streaming never settled");
    assert_eq!(stats.tiles_failed, 0);
    assert!(stats.tiles_rendered as usize <= renderer.config().max_visible_tiles);
    assert!(renderer.tile_manager().tile_count() >= stats.tiles_rendered as usize);
}

#[test]
fn test_render_without_dataset_draws_nothing() {
    let streamer = streamer(test_config());
    let mut commands = CommandList::new();

    let stats = streamer
        .renderer()
        .render(&overview_camera(), &mut commands)
        .unwrap();
    assert_eq!(stats.candidate_tiles, 0);
    assert_eq!(stats.draw_calls, 0);
    assert!(commands.is_empty());
}

#[test]
fn test_dataset_errors() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();

    assert!(matches!(
        renderer.set_active_dataset("nope"),
        Err(EngineError::ResourceNotFound { .. })
    ));
    assert!(renderer.load_dataset("bad", "missing.dem").is_err());
    assert!(renderer.dataset_ids().is_empty());
    assert!(!renderer.unload_dataset("bad"));
}

#[test]
fn test_unload_releases_tiles() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();
    renderer.load_dataset("a", "a.synthetic").unwrap();
    renderer.load_dataset("b", "b.synthetic").unwrap();
    assert_eq!(&*renderer.active_dataset().unwrap().id, "a");

    let camera = overview_camera();
    let mut commands = CommandList::new();
    renderer.render(&camera, &mut commands).unwrap();
    assert!(renderer.flush_loads(FLUSH_TIMEOUT));
    renderer.render(&camera, &mut commands).unwrap();
    assert!(renderer.flush_loads(FLUSH_TIMEOUT));
    assert!(renderer.tile_manager().tile_count() > 0);

    assert!(renderer.unload_dataset("a"));
    assert_eq!(renderer.tile_manager().tile_count(), 0);
    assert_eq!(streamer.allocator().used_memory(), 0);
    assert_eq!(&*renderer.active_dataset().unwrap().id, "b");

    renderer.set_active_dataset("b").unwrap();
    assert_eq!(renderer.dataset_ids().len(), 1);
}

#[test]
fn test_config_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "tile_size = 256.0\ntile_resolution = 33\nfar_distance = 2500.0\nenable_wireframe = true"
    )
    .unwrap();

    let config = TerrainRenderConfig::from_file(file.path()).unwrap();
    assert_eq!(config.tile_size, 256.0);
    assert_eq!(config.tile_resolution, 33);
    assert!(config.enable_wireframe);
    // Unset fields keep their defaults
    assert_eq!(config.max_visible_tiles, TerrainRenderConfig::default().max_visible_tiles);

    let streamer = streamer(TerrainRenderConfig {
        loader_threads: 1,
        ..config
    });
    let renderer = streamer.renderer();
    renderer.load_dataset("dem", "dem.synthetic").unwrap();
    let mut commands = CommandList::new();
    renderer.render(&overview_camera(), &mut commands).unwrap();
    assert!(renderer.flush_loads(FLUSH_TIMEOUT));
    commands.clear();
    renderer.render(&overview_camera(), &mut commands).unwrap();
    assert_eq!(
        commands.commands()[0],
        RecordedCommand::BindPipeline(PIPELINES.wireframe)
    );

    let mut bad = tempfile::NamedTempFile::new().unwrap();
    writeln!(bad, "near_distance = 500.0\nfar_distance = 100.0").unwrap();
    assert!(matches!(
        TerrainRenderConfig::from_file(bad.path()),
        Err(EngineError::InvalidConfig { .. })
    ));
}

#[test]
fn test_config_update_applies_next_frame() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();
    renderer.load_dataset("dem", "dem.synthetic").unwrap();

    let mut next = renderer.config();
    next.max_visible_tiles = 4;
    next.max_tiles = 64;
    renderer.update_config(next).unwrap();
    assert_ne!(renderer.config().max_visible_tiles, 4);

    let mut commands = CommandList::new();
    let stats = renderer.render(&overview_camera(), &mut commands).unwrap();
    assert_eq!(renderer.config().max_visible_tiles, 4);
    assert_eq!(renderer.tile_manager().max_tiles(), 64);
    assert!(stats.candidate_tiles - stats.tiles_culled <= 4);

    let mut fixed = renderer.config();
    fixed.tile_resolution = 65;
    assert!(matches!(
        renderer.update_config(fixed),
        Err(EngineError::InvalidConfig { .. })
    ));

    let mut invalid = renderer.config();
    invalid.max_tess_level = 128.0;
    assert!(renderer.update_config(invalid).is_err());
}

#[test]
fn test_tile_size_change_drops_tiles() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();
    renderer.load_dataset("dem", "dem.synthetic").unwrap();
    let mut commands = CommandList::new();
    renderer.render(&overview_camera(), &mut commands).unwrap();
    assert!(renderer.flush_loads(FLUSH_TIMEOUT));
    assert!(renderer.tile_manager().tile_count() > 0);

    let mut next = renderer.config();
    next.tile_size = 512.0;
    renderer.update_config(next).unwrap();
    let stats = renderer.render(&overview_camera(), &mut commands).unwrap();

    // Only tiles created on the new grid remain
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(
        renderer.tile_manager().tile_count(),
        (stats.candidate_tiles - stats.tiles_culled) as usize
    );
}

#[test]
fn test_world_queries() {
    let streamer = streamer(test_config());
    let renderer = streamer.renderer();
    assert!(renderer.world_to_tile(Vec3::ZERO, 0).is_none());
    renderer.load_dataset("dem", "dem.synthetic").unwrap();

    assert!(renderer.height_at(1000.0, 1000.0).is_some());
    assert!(renderer.height_at(-10.0, 1000.0).is_none());

    let coord = renderer
        .world_to_tile(Vec3::new(300.0, 0.0, 700.0), 0)
        .unwrap();
    assert_eq!(coord, TileCoordinate::new(1, 2, 0, "dem"));
    let parent = renderer
        .world_to_tile(Vec3::new(300.0, 0.0, 700.0), 1)
        .unwrap();
    assert_eq!(parent, coord.parent());
}
