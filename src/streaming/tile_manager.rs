//! Terrain Tile Manager
//!
//! The coordinate-keyed map is the only owner of tiles. Lookups take the
//! read lock; creation and eviction take the write lock. Each tile's own
//! mutex guards its resources, so readers never wait on a loader filling a
//! different tile. No tile mutex is taken while the map lock is held:
//! memory is read from the tiles' byte counters, and removed tiles release
//! their resources after the map lock is dropped.

use crate::culling::Frustum;
use crate::tile::{TerrainTile, TileBounds, TileCoordinate, TileState};
use glam::Vec3;
use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileManagerStats {
    pub total_tiles: usize,
    pub empty_tiles: usize,
    pub loading_tiles: usize,
    pub ready_tiles: usize,
    pub error_tiles: usize,
    pub evicted_tiles: usize,
    pub cpu_memory_usage: u64,
    pub gpu_memory_usage: u64,
}

pub struct TerrainTileManager {
    tiles: RwLock<FxHashMap<TileCoordinate, Arc<TerrainTile>>>,
    max_tiles: AtomicUsize,
    max_memory_usage: AtomicU64,
    tiles_evicted: AtomicU64,
}

impl TerrainTileManager {
    pub fn new(max_tiles: usize, max_memory_usage: u64) -> Self {
        Self {
            tiles: RwLock::new(FxHashMap::default()),
            max_tiles: AtomicUsize::new(max_tiles.max(1)),
            max_memory_usage: AtomicU64::new(max_memory_usage),
            tiles_evicted: AtomicU64::new(0),
        }
    }

    /// Non-blocking lookup; callers schedule a load on a miss
    pub fn get_tile(&self, coord: &TileCoordinate) -> Option<Arc<TerrainTile>> {
        self.tiles.read().get(coord).cloned()
    }

    pub fn contains(&self, coord: &TileCoordinate) -> bool {
        self.tiles.read().contains_key(coord)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.read().len()
    }

    /// Insert if absent, then bring the map back under its limits. The tile
    /// just created or found is never the one evicted.
    pub fn create_tile(&self, coord: TileCoordinate, bounds: TileBounds) -> Arc<TerrainTile> {
        let (tile, evicted) = {
            let mut tiles = self.tiles.write();
            let tile = Arc::clone(
                tiles
                    .entry(coord.clone())
                    .or_insert_with(|| Arc::new(TerrainTile::new(coord.clone(), bounds))),
            );
            let evicted = self.enforce_limits_locked(&mut tiles, Some(&coord));
            (tile, evicted)
        };
        release_all(&evicted);
        tile
    }

    /// Evict least recently used tiles until count and memory fit
    pub fn enforce_limits(&self) -> usize {
        let evicted = {
            let mut tiles = self.tiles.write();
            self.enforce_limits_locked(&mut tiles, None)
        };
        release_all(&evicted);
        evicted.len()
    }

    /// Unlink tiles over the limits; the caller releases them once the map
    /// lock is dropped
    fn enforce_limits_locked(
        &self,
        tiles: &mut FxHashMap<TileCoordinate, Arc<TerrainTile>>,
        protected: Option<&TileCoordinate>,
    ) -> Vec<Arc<TerrainTile>> {
        let max_tiles = self.max_tiles.load(Ordering::Relaxed);
        let max_memory = self.max_memory_usage.load(Ordering::Relaxed);

        let mut memory: u64 = tiles.values().map(|tile| tile.memory_usage()).sum();
        if tiles.len() <= max_tiles && memory <= max_memory {
            return Vec::new();
        }

        // Oldest access first
        let mut ranked: Vec<(u32, TileCoordinate)> = tiles
            .iter()
            .filter(|(coord, _)| Some(*coord) != protected)
            .map(|(coord, tile)| (tile.frames_since_access(), coord.clone()))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut evicted = Vec::new();
        for (_, coord) in ranked {
            if tiles.len() <= max_tiles && memory <= max_memory {
                break;
            }
            if let Some(tile) = tiles.remove(&coord) {
                memory = memory.saturating_sub(tile.memory_usage());
                evicted.push(tile);
            }
        }

        if !evicted.is_empty() {
            self.tiles_evicted
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            log::debug!(
                "[TileManager] Evicted {} tiles ({} resident, {} bytes)",
                evicted.len(),
                tiles.len(),
                memory
            );
        }
        evicted
    }

    /// Up to `max_count` tiles awaiting a load, highest priority first
    pub fn get_high_priority_loading_queue(&self, max_count: usize) -> Vec<TileCoordinate> {
        let mut waiting: Vec<(f32, TileCoordinate)> = self
            .tiles
            .read()
            .iter()
            .filter(|(_, tile)| tile.state().needs_load())
            .map(|(coord, tile)| (tile.priority(), coord.clone()))
            .collect();
        waiting.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        waiting
            .into_iter()
            .take(max_count)
            .map(|(_, coord)| coord)
            .collect()
    }

    pub fn remove_tile(&self, coord: &TileCoordinate) -> bool {
        let removed = self.tiles.write().remove(coord);
        match removed {
            Some(tile) => {
                release(&tile);
                true
            }
            None => false,
        }
    }

    pub fn remove_all_tiles(&self) -> usize {
        let drained: Vec<Arc<TerrainTile>> = self.tiles.write().drain().map(|(_, tile)| tile).collect();
        release_all(&drained);
        drained.len()
    }

    pub fn remove_dataset(&self, dataset_id: &str) -> usize {
        let removed: Vec<Arc<TerrainTile>> = {
            let mut tiles = self.tiles.write();
            let doomed: Vec<TileCoordinate> = tiles
                .keys()
                .filter(|coord| &*coord.dataset_id == dataset_id)
                .cloned()
                .collect();
            doomed.iter().filter_map(|coord| tiles.remove(coord)).collect()
        };
        release_all(&removed);
        removed.len()
    }

    fn snapshot(&self) -> Vec<Arc<TerrainTile>> {
        self.tiles.read().values().cloned().collect()
    }

    pub fn get_tiles_in_bounds(&self, bounds: &TileBounds) -> Vec<Arc<TerrainTile>> {
        self.snapshot()
            .into_iter()
            .filter(|tile| tile.bounds().intersects_xz(bounds))
            .collect()
    }

    pub fn get_visible_tiles(&self, frustum: &Frustum) -> Vec<Arc<TerrainTile>> {
        self.snapshot()
            .into_par_iter()
            .filter(|tile| tile.is_visible(frustum))
            .collect()
    }

    pub fn get_tiles_by_lod(&self, lod: u32) -> Vec<Arc<TerrainTile>> {
        self.snapshot()
            .into_iter()
            .filter(|tile| tile.lod() == lod)
            .collect()
    }

    pub fn update_priorities(&self, camera_position: Vec3) {
        self.snapshot().par_iter().for_each(|tile| {
            tile.update_priority(camera_position);
        });
    }

    pub fn update_lod(&self, camera_position: Vec3, near: f32, far: f32) {
        self.snapshot().par_iter().for_each(|tile| {
            tile.update_lod(camera_position, near, far);
        });
    }

    /// Age every tile by one frame
    pub fn advance_frame(&self) {
        for tile in self.tiles.read().values() {
            tile.increment_frame_counter();
        }
    }

    /// Remove tiles unused for more than `max_frames` frames
    pub fn age_tiles(&self, max_frames: u32) -> usize {
        let stale: Vec<Arc<TerrainTile>> = {
            let mut tiles = self.tiles.write();
            let coords: Vec<TileCoordinate> = tiles
                .iter()
                .filter(|(_, tile)| tile.frames_since_access() > max_frames)
                .map(|(coord, _)| coord.clone())
                .collect();
            coords.iter().filter_map(|coord| tiles.remove(coord)).collect()
        };
        release_all(&stale);
        if !stale.is_empty() {
            self.tiles_evicted
                .fetch_add(stale.len() as u64, Ordering::Relaxed);
            log::debug!("[TileManager] Aged out {} tiles", stale.len());
        }
        stale.len()
    }

    /// Evict least recently used tiles until resident memory is at most
    /// `target_bytes`; returns the bytes released
    pub fn perform_memory_cleanup(&self, target_bytes: u64) -> u64 {
        let mut tiles = self.tiles.write();
        let mut memory: u64 = tiles.values().map(|tile| tile.memory_usage()).sum();
        if memory <= target_bytes {
            return 0;
        }
        let mut removed = Vec::new();

        let mut ranked: Vec<(u32, TileCoordinate, u64)> = tiles
            .iter()
            .map(|(coord, tile)| (tile.frames_since_access(), coord.clone(), tile.memory_usage()))
            .filter(|(_, _, bytes)| *bytes > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut released = 0;
        for (_, coord, bytes) in ranked {
            if memory <= target_bytes {
                break;
            }
            if let Some(tile) = tiles.remove(&coord) {
                memory = memory.saturating_sub(bytes);
                released += bytes;
                self.tiles_evicted.fetch_add(1, Ordering::Relaxed);
                removed.push(tile);
            }
        }
        drop(tiles);
        release_all(&removed);
        log::debug!(
            "[TileManager] Memory cleanup released {} bytes, {} resident",
            released,
            memory
        );
        released
    }

    pub fn total_memory_usage(&self) -> u64 {
        self.tiles.read().values().map(|tile| tile.memory_usage()).sum()
    }

    pub fn total_gpu_memory_usage(&self) -> u64 {
        self.tiles
            .read()
            .values()
            .map(|tile| tile.gpu_memory_usage())
            .sum()
    }

    pub fn tiles_evicted(&self) -> u64 {
        self.tiles_evicted.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> TileManagerStats {
        let tiles = self.tiles.read();
        let mut stats = TileManagerStats {
            total_tiles: tiles.len(),
            ..Default::default()
        };
        for tile in tiles.values() {
            match tile.state() {
                TileState::Empty => stats.empty_tiles += 1,
                TileState::Loading | TileState::Loaded | TileState::Uploading => {
                    stats.loading_tiles += 1
                }
                TileState::Ready => stats.ready_tiles += 1,
                TileState::Error => stats.error_tiles += 1,
                TileState::Evicted => stats.evicted_tiles += 1,
            }
            stats.gpu_memory_usage += tile.gpu_memory_usage();
            stats.cpu_memory_usage += tile.cpu_memory_usage();
        }
        stats
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles.load(Ordering::Relaxed)
    }

    pub fn max_memory_usage(&self) -> u64 {
        self.max_memory_usage.load(Ordering::Relaxed)
    }

    pub fn set_max_tiles(&self, max_tiles: usize) {
        self.max_tiles.store(max_tiles.max(1), Ordering::Relaxed);
        self.enforce_limits();
    }

    pub fn set_max_memory_usage(&self, max_memory_usage: u64) {
        self.max_memory_usage
            .store(max_memory_usage, Ordering::Relaxed);
        self.enforce_limits();
    }
}

/// Free the resources of tiles that have left the map
fn release_all(tiles: &[Arc<TerrainTile>]) {
    tiles.iter().for_each(|tile| release(tile));
}

fn release(tile: &TerrainTile) {
    if tile.has_error() {
        return;
    }
    if let Err(e) = tile.evict_from_memory() {
        log::warn!("[TileManager] Failed to evict {}: {}", tile.coordinate(), e);
    }
}
