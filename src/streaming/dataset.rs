use crate::tile::TileBounds;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A loaded elevation source that tiles are cut from
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub id: Arc<str>,
    pub path: Arc<PathBuf>,
    /// World footprint and elevation range
    pub bounds: TileBounds,
}

/// Dataset id to source mapping shared by the renderer and loader threads
#[derive(Default)]
pub struct DatasetRegistry {
    datasets: RwLock<FxHashMap<Arc<str>, Arc<DatasetInfo>>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any dataset registered under the same id
    pub fn register(&self, id: &str, path: PathBuf, bounds: TileBounds) -> Arc<DatasetInfo> {
        let id: Arc<str> = Arc::from(id);
        let info = Arc::new(DatasetInfo {
            id: Arc::clone(&id),
            path: Arc::new(path),
            bounds,
        });
        self.datasets.write().insert(id, Arc::clone(&info));
        info
    }

    pub fn get(&self, id: &str) -> Option<Arc<DatasetInfo>> {
        self.datasets.read().get(id).cloned()
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<DatasetInfo>> {
        self.datasets.write().remove(id)
    }

    pub fn ids(&self) -> Vec<Arc<str>> {
        let mut ids: Vec<Arc<str>> = self.datasets.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.read().is_empty()
    }
}
