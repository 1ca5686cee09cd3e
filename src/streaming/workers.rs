//! Background loader and streaming threads
//!
//! Loaders sleep-poll the shared FIFO and run each claimed request through
//! load and upload before taking the next one. A single streaming thread
//! ages out tiles the camera has left behind and answers cleanup requests
//! raised by allocator pressure.

use super::{
    LoadFailure, LoadQueue, LoadRequest, StreamingErrorContext, StreamingResult,
    TerrainTileManager,
};
use crate::tile::TileLoadContext;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// 0 picks a quarter of the available cores, at least one
    pub loader_threads: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    pub streaming_interval: Duration,
    /// Tiles unused for longer than this many frames are dropped
    pub eviction_frames: u32,
    /// Fraction of the tile memory budget kept after a pressure cleanup
    pub cleanup_target: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            loader_threads: 0,
            poll_interval: Duration::from_millis(10),
            streaming_interval: Duration::from_millis(100),
            eviction_frames: super::DEFAULT_EVICTION_FRAMES,
            cleanup_target: 0.75,
        }
    }
}

impl StreamingConfig {
    pub fn resolved_loader_threads(&self) -> usize {
        if self.loader_threads > 0 {
            self.loader_threads
        } else {
            (num_cpus::get() / 4).max(1)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingStats {
    pub tiles_loaded: u64,
    pub tiles_failed: u64,
    pub tiles_skipped: u64,
    pub tiles_aged_out: u64,
    pub cleanups: u64,
    pub queue_length: usize,
    pub in_flight: usize,
    pub loader_threads: usize,
}

#[derive(Default)]
struct StreamingCounters {
    loaded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    aged_out: AtomicU64,
    cleanups: AtomicU64,
}

/// State shared by the render thread and every worker
pub struct StreamingShared {
    pub manager: Arc<TerrainTileManager>,
    pub queue: Arc<LoadQueue>,
    pub context: TileLoadContext,
    cleanup_requested: AtomicBool,
    counters: StreamingCounters,
}

impl StreamingShared {
    pub fn new(
        manager: Arc<TerrainTileManager>,
        queue: Arc<LoadQueue>,
        context: TileLoadContext,
    ) -> Self {
        Self {
            manager,
            queue,
            context,
            cleanup_requested: AtomicBool::new(false),
            counters: StreamingCounters::default(),
        }
    }

    /// Ask the streaming thread for a memory cleanup on its next tick
    pub fn request_cleanup(&self) {
        self.cleanup_requested.store(true, Ordering::Release);
    }

    pub fn cleanup_requested(&self) -> bool {
        self.cleanup_requested.load(Ordering::Acquire)
    }

    /// Pop and run one request on the calling thread
    pub fn process_next(&self) -> bool {
        match self.queue.pop() {
            Some(request) => {
                self.process_request(request);
                true
            }
            None => false,
        }
    }

    /// Load and upload a claimed request, skipping tiles that left the map
    /// or were filled by someone else meanwhile
    pub fn process_request(&self, request: LoadRequest) {
        let tile = self
            .manager
            .get_tile(&request.coordinate)
            .filter(|tile| tile.state().needs_load());

        match tile {
            Some(tile) => match tile.load_and_upload(&request.path, &self.context) {
                Ok(()) => {
                    self.counters.loaded.fetch_add(1, Ordering::Relaxed);
                    log::trace!("[TileLoader] Tile {} ready", request.coordinate);
                }
                Err(e) => match LoadFailure::classify(&e) {
                    LoadFailure::Superseded => {
                        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("[TileLoader] Tile {} superseded: {}", request.coordinate, e);
                    }
                    LoadFailure::Memory => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        self.request_cleanup();
                        log::warn!("[TileLoader] Tile {} out of memory: {}", request.coordinate, e);
                    }
                    kind => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        log::debug!(
                            "[TileLoader] Tile {} not loaded ({}): {}",
                            request.coordinate,
                            kind,
                            e
                        );
                    }
                },
            },
            None => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.queue.complete(&request.coordinate);
    }

    /// One pass of the streaming thread
    pub fn streaming_tick(&self, config: &StreamingConfig) {
        let aged = self.manager.age_tiles(config.eviction_frames);
        self.counters
            .aged_out
            .fetch_add(aged as u64, Ordering::Relaxed);

        if self.cleanup_requested.swap(false, Ordering::AcqRel) {
            let target =
                (self.manager.max_memory_usage() as f64 * config.cleanup_target as f64) as u64;
            let freed = self.manager.perform_memory_cleanup(target);
            self.counters.cleanups.fetch_add(1, Ordering::Relaxed);
            log::debug!("[TerrainStreaming] Pressure cleanup freed {} bytes", freed);
        }

        let manager = &self.manager;
        let dropped = self.queue.retain(|request| {
            manager
                .get_tile(&request.coordinate)
                .is_some_and(|tile| tile.state().needs_load())
        });
        if dropped > 0 {
            log::trace!("[TerrainStreaming] Dropped {} stale load requests", dropped);
        }
    }

    pub fn stats(&self) -> StreamingStats {
        StreamingStats {
            tiles_loaded: self.counters.loaded.load(Ordering::Relaxed),
            tiles_failed: self.counters.failed.load(Ordering::Relaxed),
            tiles_skipped: self.counters.skipped.load(Ordering::Relaxed),
            tiles_aged_out: self.counters.aged_out.load(Ordering::Relaxed),
            cleanups: self.counters.cleanups.load(Ordering::Relaxed),
            queue_length: self.queue.len(),
            in_flight: self.queue.in_flight(),
            loader_threads: 0,
        }
    }
}

/// Owns the loader pool and the streaming thread; joins them on shutdown
pub struct StreamingWorkers {
    shared: Arc<StreamingShared>,
    stop: Arc<AtomicBool>,
    shutdown: Mutex<Option<Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    loader_threads: usize,
}

impl StreamingWorkers {
    pub fn start(shared: Arc<StreamingShared>, config: StreamingConfig) -> StreamingResult<Self> {
        let loader_threads = config.resolved_loader_threads();
        let stop = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let workers = Self {
            shared: Arc::clone(&shared),
            stop: Arc::clone(&stop),
            shutdown: Mutex::new(Some(shutdown_tx)),
            handles: Mutex::new(Vec::with_capacity(loader_threads + 1)),
            loader_threads,
        };

        for index in 0..loader_threads {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            let poll_interval = config.poll_interval;
            let name = format!("terrain-loader-{}", index);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        if !shared.process_next() {
                            thread::sleep(poll_interval);
                        }
                    }
                })
                .worker_context(&name)?;
            workers.handles.lock().push(handle);
        }

        let streaming_shared = Arc::clone(&shared);
        let streaming_config = config.clone();
        let handle = thread::Builder::new()
            .name("terrain-streaming".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(streaming_config.streaming_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        streaming_shared.streaming_tick(&streaming_config)
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .worker_context("terrain-streaming")?;
        workers.handles.lock().push(handle);

        log::info!(
            "[TerrainStreaming] Started {} loader threads and the streaming thread",
            loader_threads
        );
        Ok(workers)
    }

    pub fn shared(&self) -> &Arc<StreamingShared> {
        &self.shared
    }

    pub fn loader_threads(&self) -> usize {
        self.loader_threads
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StreamingStats {
        StreamingStats {
            loader_threads: self.loader_threads,
            ..self.shared.stats()
        }
    }

    /// Stop every worker and wait for claimed loads to finish
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(sender) = self.shutdown.lock().take() {
            let _ = sender.send(());
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                log::warn!("[TerrainStreaming] A worker thread panicked");
            }
        }
        log::info!("[TerrainStreaming] Workers stopped");
    }
}

impl Drop for StreamingWorkers {
    fn drop(&mut self) {
        self.shutdown();
    }
}
