//! Headless streaming benchmark
//!
//! Flies a camera across a synthetic dataset and reports per-frame culling,
//! streaming and draw statistics.
//!
//! Usage: terrain_stream_bench [--frames N] [--config FILE] [--gpu]

use anyhow::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use terrain_streamer::camera::{init_camera_at, transform};
use terrain_streamer::gpu::{
    CommandList, GpuDevice, HeadlessDevice, PipelineHandle, PipelineLayoutHandle, WgpuDevice,
};
use terrain_streamer::memory::format_bytes;
use terrain_streamer::tile::{SyntheticHeightmapLoader, SyntheticTerrainConfig};
use terrain_streamer::{TerrainMemoryConfig, TerrainPipelines, TerrainRenderConfig, TerrainStreamer};

struct BenchArgs {
    frames: u32,
    config: Option<String>,
    use_gpu: bool,
}

fn parse_args() -> anyhow::Result<BenchArgs> {
    let mut args = BenchArgs {
        frames: 600,
        config: None,
        use_gpu: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => {
                let value = iter.next().context("--frames needs a value")?;
                args.frames = value.parse().context("--frames must be a number")?;
            }
            "--config" => args.config = Some(iter.next().context("--config needs a path")?),
            "--gpu" => args.use_gpu = true,
            other => anyhow::bail!("unknown argument '{}'", other),
        }
    }
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;

    let render_config = match &args.config {
        Some(path) => TerrainRenderConfig::from_file(path)
            .with_context(|| format!("loading {}", path))?,
        None => TerrainRenderConfig {
            tile_size: 256.0,
            tile_resolution: 64,
            far_distance: 4000.0,
            ..Default::default()
        },
    };

    let wgpu_device = if args.use_gpu {
        match WgpuDevice::request() {
            Ok(device) => Some(Arc::new(device)),
            Err(e) => {
                log::warn!("GPU unavailable ({}), running headless", e);
                None
            }
        }
    } else {
        None
    };
    let device: Arc<dyn GpuDevice> = match &wgpu_device {
        Some(device) => Arc::clone(device) as Arc<dyn GpuDevice>,
        None => Arc::new(HeadlessDevice::new()),
    };

    let loader = Arc::new(SyntheticHeightmapLoader::new(SyntheticTerrainConfig {
        width: 1024,
        height: 1024,
        extent: 16384.0,
        origin: (-8192.0, -8192.0),
        ..Default::default()
    }));
    let pipelines = TerrainPipelines {
        solid: PipelineHandle(1),
        wireframe: PipelineHandle(2),
        layout: PipelineLayoutHandle(1),
    };

    let mut streamer = TerrainStreamer::new(
        device,
        loader,
        pipelines,
        render_config,
        TerrainMemoryConfig::default(),
    )?;
    if let Some(device) = &wgpu_device {
        streamer.renderer_mut().attach_gpu_culling(device);
    }

    let renderer = streamer.renderer();
    renderer.load_dataset("synthetic", "synthetic.terrain")?;
    println!("Culling backend: {}", renderer.culling_backend_name());

    let mut camera = init_camera_at(glam::Vec3::new(-4000.0, 400.0, 0.0), 1920, 1080);
    camera = transform::look_at(&camera, glam::Vec3::new(0.0, 0.0, 0.0));

    let start = Instant::now();
    let mut commands = CommandList::new();
    let mut total_draws = 0u64;
    let mut worst_frame = 0.0f32;
    for frame in 0..args.frames {
        commands.clear();
        let stats = renderer.render(&camera, &mut commands)?;
        total_draws += stats.draw_calls as u64;
        worst_frame = worst_frame.max(stats.frame_time_ms);
        if frame % 60 == 0 {
            println!("{}", stats.summary());
        }
        camera = transform::translate(&camera, glam::Vec3::new(12.0, 0.0, 0.0));
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();

    let stats = renderer.get_stats();
    let streaming = renderer.streaming_stats();
    println!();
    println!("Frames:            {}", args.frames);
    println!("Wall time:         {:.2?}", elapsed);
    println!("Worst frame:       {:.2} ms", worst_frame);
    println!("Draw calls:        {}", total_draws);
    println!("Tiles loaded:      {}", streaming.tiles_loaded);
    println!("Tiles failed:      {}", streaming.tiles_failed);
    println!("Tiles aged out:    {}", streaming.tiles_aged_out);
    println!("Tile memory:       {}", format_bytes(stats.memory_usage));
    println!("GPU tile memory:   {}", format_bytes(stats.gpu_memory_usage));
    for line in streamer.allocator().memory_report() {
        println!("{}", line);
    }
    Ok(())
}
