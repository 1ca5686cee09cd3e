use glam::Vec3;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Grid cell of one tile at one LOD level of one dataset.
///
/// Level 0 is the finest level; each level up doubles the tile edge. Parent,
/// children and neighbors are computed on demand, tiles never link to each
/// other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    pub x: i32,
    pub y: i32,
    pub level: u32,
    pub dataset_id: Arc<str>,
}

impl TileCoordinate {
    pub fn new(x: i32, y: i32, level: u32, dataset_id: impl Into<Arc<str>>) -> Self {
        Self {
            x,
            y,
            level,
            dataset_id: dataset_id.into(),
        }
    }

    /// Coarser tile covering this one. Uses floor division so negative
    /// cells map to the parent that actually contains them.
    pub fn parent(&self) -> TileCoordinate {
        TileCoordinate {
            x: self.x.div_euclid(2),
            y: self.y.div_euclid(2),
            level: self.level + 1,
            dataset_id: Arc::clone(&self.dataset_id),
        }
    }

    /// The four finer tiles; empty at level 0
    pub fn children(&self) -> Vec<TileCoordinate> {
        if self.level == 0 {
            return Vec::new();
        }
        let level = self.level - 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]
            .into_iter()
            .map(|(cx, cy)| TileCoordinate::new(cx, cy, level, Arc::clone(&self.dataset_id)))
            .collect()
    }

    /// Same-level neighbors: left, right, bottom, top, then the diagonals
    pub fn neighbors(&self) -> [TileCoordinate; 8] {
        const OFFSETS: [(i32, i32); 8] = [
            (-1, 0),
            (1, 0),
            (0, -1),
            (0, 1),
            (-1, -1),
            (1, -1),
            (-1, 1),
            (1, 1),
        ];
        OFFSETS.map(|(dx, dy)| {
            TileCoordinate::new(
                self.x + dx,
                self.y + dy,
                self.level,
                Arc::clone(&self.dataset_id),
            )
        })
    }

    /// `dataset_level_x_y`
    pub fn to_string_key(&self) -> String {
        format!("{}_{}_{}_{}", self.dataset_id, self.level, self.x, self.y)
    }

    /// World edge length of a tile at `level`
    pub fn edge_length(level: u32, tile_size: f32) -> f32 {
        tile_size * (1u64 << level.min(62)) as f32
    }

    /// Tile containing a world position; the tile grid lies on the x/z plane
    pub fn from_world(
        position: Vec3,
        level: u32,
        tile_size: f32,
        dataset_id: impl Into<Arc<str>>,
    ) -> TileCoordinate {
        let edge = Self::edge_length(level, tile_size);
        TileCoordinate::new(
            (position.x / edge).floor() as i32,
            (position.z / edge).floor() as i32,
            level,
            dataset_id,
        )
    }
}

impl Ord for TileCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dataset_id
            .cmp(&other.dataset_id)
            .then(self.level.cmp(&other.level))
            .then(self.y.cmp(&other.y))
            .then(self.x.cmp(&other.x))
    }
}

impl PartialOrd for TileCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}", self.dataset_id, self.level, self.x, self.y)
    }
}
