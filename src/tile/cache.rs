use super::{Heightmap, TileCoordinate, TileCpuData};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Statistics about cache performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size_bytes: u64,
    pub max_size_bytes: u64,
    pub entry_count: usize,
    pub heightmap_count: usize,
}

struct LruCache {
    entries: FxHashMap<TileCoordinate, Arc<TileCpuData>>,
    access_order: Vec<TileCoordinate>,
    size_bytes: u64,
    stats: CacheStats,
}

impl LruCache {
    fn touch(&mut self, coord: &TileCoordinate) {
        self.access_order.retain(|k| k != coord);
        self.access_order.push(coord.clone());
    }

    fn remove(&mut self, coord: &TileCoordinate) -> Option<Arc<TileCpuData>> {
        let data = self.entries.remove(coord)?;
        self.access_order.retain(|k| k != coord);
        self.size_bytes -= data.memory_usage();
        Some(data)
    }
}

/// CPU-side cache for decoded tile samples and whole datasets.
///
/// Tile entries are LRU-evicted by count and byte budget. Dataset
/// heightmaps are pinned until removed explicitly.
pub struct TerrainCache {
    tiles: RwLock<LruCache>,
    heightmaps: RwLock<FxHashMap<PathBuf, Arc<Heightmap>>>,
    max_size_bytes: u64,
    max_entries: usize,
}

impl TerrainCache {
    pub fn new(size_mb: u64, max_entries: usize) -> Self {
        let max_size_bytes = size_mb * 1024 * 1024;
        Self {
            tiles: RwLock::new(LruCache {
                entries: FxHashMap::default(),
                access_order: Vec::new(),
                size_bytes: 0,
                stats: CacheStats {
                    max_size_bytes,
                    ..Default::default()
                },
            }),
            heightmaps: RwLock::new(FxHashMap::default()),
            max_size_bytes,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get_tile(&self, coord: &TileCoordinate) -> Option<Arc<TileCpuData>> {
        let mut cache = self.tiles.write();
        match cache.entries.get(coord).cloned() {
            Some(data) => {
                cache.touch(coord);
                cache.stats.hits += 1;
                Some(data)
            }
            None => {
                cache.stats.misses += 1;
                None
            }
        }
    }

    pub fn put_tile(&self, coord: TileCoordinate, data: Arc<TileCpuData>) {
        let size = data.memory_usage();
        if size > self.max_size_bytes {
            log::debug!(
                "[TerrainCache] Tile {} ({} bytes) exceeds cache budget, not cached",
                coord,
                size
            );
            return;
        }

        let mut cache = self.tiles.write();
        cache.remove(&coord);

        while !cache.access_order.is_empty()
            && (cache.entries.len() >= self.max_entries
                || cache.size_bytes + size > self.max_size_bytes)
        {
            let oldest = cache.access_order.remove(0);
            if let Some(evicted) = cache.entries.remove(&oldest) {
                cache.size_bytes -= evicted.memory_usage();
                cache.stats.evictions += 1;
            }
        }

        cache.size_bytes += size;
        cache.access_order.push(coord.clone());
        cache.entries.insert(coord, data);
    }

    pub fn remove_tile(&self, coord: &TileCoordinate) -> bool {
        self.tiles.write().remove(coord).is_some()
    }

    /// Drop every tile entry of one dataset
    pub fn remove_dataset(&self, dataset_id: &str) -> usize {
        let mut cache = self.tiles.write();
        let doomed: Vec<TileCoordinate> = cache
            .entries
            .keys()
            .filter(|coord| &*coord.dataset_id == dataset_id)
            .cloned()
            .collect();
        for coord in &doomed {
            cache.remove(coord);
        }
        doomed.len()
    }

    pub fn get_heightmap(&self, path: &Path) -> Option<Arc<Heightmap>> {
        self.heightmaps.read().get(path).cloned()
    }

    pub fn put_heightmap(&self, path: PathBuf, heightmap: Arc<Heightmap>) {
        self.heightmaps.write().insert(path, heightmap);
    }

    pub fn remove_heightmap(&self, path: &Path) -> Option<Arc<Heightmap>> {
        self.heightmaps.write().remove(path)
    }

    pub fn clear(&self) {
        let mut cache = self.tiles.write();
        cache.entries.clear();
        cache.access_order.clear();
        cache.size_bytes = 0;
        self.heightmaps.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.tiles.read();
        let mut stats = cache.stats.clone();
        stats.current_size_bytes = cache.size_bytes;
        stats.entry_count = cache.entries.len();
        stats.heightmap_count = self.heightmaps.read().len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(samples: u32) -> Arc<TileCpuData> {
        Arc::new(TileCpuData::new(vec![0.0; (samples * samples) as usize], samples, samples, 1.0).unwrap())
    }

    #[test]
    fn test_lru_order_by_count() {
        let cache = TerrainCache::new(16, 2);
        let a = TileCoordinate::new(0, 0, 0, "d");
        let b = TileCoordinate::new(1, 0, 0, "d");
        let c = TileCoordinate::new(2, 0, 0, "d");

        cache.put_tile(a.clone(), data(4));
        cache.put_tile(b.clone(), data(4));
        // Touch a so b becomes the oldest
        assert!(cache.get_tile(&a).is_some());
        cache.put_tile(c.clone(), data(4));

        assert!(cache.get_tile(&b).is_none());
        assert!(cache.get_tile(&a).is_some());
        assert!(cache.get_tile(&c).is_some());
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_byte_budget() {
        // 1 MiB holds four 256x256 f32 grids exactly
        let cache = TerrainCache::new(1, 100);
        for x in 0..5 {
            cache.put_tile(TileCoordinate::new(x, 0, 0, "d"), data(256));
        }
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 4);
        assert!(stats.current_size_bytes <= stats.max_size_bytes);
        assert!(cache.get_tile(&TileCoordinate::new(0, 0, 0, "d")).is_none());
    }

    #[test]
    fn test_remove_dataset_keeps_others() {
        let cache = TerrainCache::new(16, 16);
        cache.put_tile(TileCoordinate::new(0, 0, 0, "a"), data(4));
        cache.put_tile(TileCoordinate::new(0, 0, 0, "b"), data(4));
        assert_eq!(cache.remove_dataset("a"), 1);
        assert_eq!(cache.stats().entry_count, 1);
        assert_eq!(cache.stats().current_size_bytes, 64);
    }
}
