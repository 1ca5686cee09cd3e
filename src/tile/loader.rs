//! Elevation grid loading contract.
//!
//! Raster parsing lives outside this crate. Anything that can turn a path
//! into a grid of heights plus its world bounds implements `HeightmapLoader`.

use super::TileBounds;
use glam::Vec3;
use noise::{NoiseFn, Perlin};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("heightmap not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported heightmap source: {0}")]
    Unsupported(String),

    #[error("invalid heightmap data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded elevation grid
#[derive(Debug, Clone)]
pub struct Heightmap {
    /// Row-major, rows run along +z
    pub heights: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// World footprint; `min.y`/`max.y` carry the elevation range
    pub bounds: TileBounds,
    /// Affine pixel-to-world transform (origin x, pixel width, row rotation,
    /// origin z, column rotation, pixel height)
    pub transform: [f64; 6],
}

impl Heightmap {
    pub fn new(
        heights: Vec<f32>,
        width: u32,
        height: u32,
        min_xz: (f32, f32),
        max_xz: (f32, f32),
    ) -> Result<Self, LoaderError> {
        if width < 2 || height < 2 {
            return Err(LoaderError::InvalidData(format!(
                "grid {}x{} is smaller than 2x2",
                width, height
            )));
        }
        if heights.len() != width as usize * height as usize {
            return Err(LoaderError::InvalidData(format!(
                "{} samples for a {}x{} grid",
                heights.len(),
                width,
                height
            )));
        }
        if heights.iter().any(|h| !h.is_finite()) {
            return Err(LoaderError::InvalidData("non-finite height sample".to_string()));
        }
        if max_xz.0 <= min_xz.0 || max_xz.1 <= min_xz.1 {
            return Err(LoaderError::InvalidData("empty world footprint".to_string()));
        }

        let (lo, hi) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        let bounds = TileBounds::new(
            Vec3::new(min_xz.0, lo, min_xz.1),
            Vec3::new(max_xz.0, hi, max_xz.1),
        );
        let transform = [
            min_xz.0 as f64,
            (max_xz.0 - min_xz.0) as f64 / (width - 1) as f64,
            0.0,
            min_xz.1 as f64,
            0.0,
            (max_xz.1 - min_xz.1) as f64 / (height - 1) as f64,
        ];

        Ok(Self {
            heights,
            width,
            height,
            bounds,
            transform,
        })
    }

    fn texel(&self, column: u32, row: u32) -> f32 {
        self.heights[row as usize * self.width as usize + column as usize]
    }

    /// Bilinear height at a world position, clamped to the grid edge
    pub fn sample(&self, x: f32, z: f32) -> f32 {
        let size = self.bounds.size();
        let u = ((x - self.bounds.min.x) / size.x).clamp(0.0, 1.0) * (self.width - 1) as f32;
        let v = ((z - self.bounds.min.z) / size.z).clamp(0.0, 1.0) * (self.height - 1) as f32;

        let c0 = u.floor() as u32;
        let r0 = v.floor() as u32;
        let c1 = (c0 + 1).min(self.width - 1);
        let r1 = (r0 + 1).min(self.height - 1);
        let fu = u - c0 as f32;
        let fv = v - r0 as f32;

        let top = self.texel(c0, r0) * (1.0 - fu) + self.texel(c1, r0) * fu;
        let bottom = self.texel(c0, r1) * (1.0 - fu) + self.texel(c1, r1) * fu;
        top * (1.0 - fv) + bottom * fv
    }

    pub fn contains_xz(&self, x: f32, z: f32) -> bool {
        x >= self.bounds.min.x && x <= self.bounds.max.x && z >= self.bounds.min.z && z <= self.bounds.max.z
    }

    pub fn memory_usage(&self) -> u64 {
        (self.heights.len() * std::mem::size_of::<f32>()) as u64
    }
}

/// `(heights, bounds, transform) = load(path)`
pub trait HeightmapLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Heightmap, LoaderError>;
}

/// Parameters for procedurally generated datasets
#[derive(Debug, Clone)]
pub struct SyntheticTerrainConfig {
    pub width: u32,
    pub height: u32,
    /// World footprint, starting at `origin`
    pub extent: f32,
    pub origin: (f32, f32),
    pub amplitude: f32,
    pub seed: u32,
}

impl Default for SyntheticTerrainConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            extent: 4096.0,
            origin: (0.0, 0.0),
            amplitude: 200.0,
            seed: 12345,
        }
    }
}

/// Generates rolling terrain from layered Perlin noise.
///
/// Paths starting with `missing` fail with `NotFound`, so streaming error
/// paths can be driven without touching the filesystem.
pub struct SyntheticHeightmapLoader {
    config: SyntheticTerrainConfig,
    base_noise: Perlin,
    detail_noise: Perlin,
}

impl SyntheticHeightmapLoader {
    pub fn new(config: SyntheticTerrainConfig) -> Self {
        Self {
            base_noise: Perlin::new(config.seed),
            detail_noise: Perlin::new(config.seed.wrapping_add(1)),
            config,
        }
    }

    pub fn config(&self) -> &SyntheticTerrainConfig {
        &self.config
    }

    fn height_at(&self, x: f64, z: f64) -> f32 {
        let amplitude = self.config.amplitude as f64;

        // Broad ridges, then hills, then fine detail
        let ridges = self.base_noise.get([x * 0.0008, z * 0.0008]) * amplitude * 0.6;
        let hills = self.detail_noise.get([x * 0.004, z * 0.004]) * amplitude * 0.3;
        let detail = self.base_noise.get([x * 0.02, z * 0.02]) * amplitude * 0.1;

        ((ridges + hills + detail) + amplitude * 0.5).max(0.0) as f32
    }
}

impl Default for SyntheticHeightmapLoader {
    fn default() -> Self {
        Self::new(SyntheticTerrainConfig::default())
    }
}

impl HeightmapLoader for SyntheticHeightmapLoader {
    fn load(&self, path: &Path) -> Result<Heightmap, LoaderError> {
        let missing = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(true, |name| name.starts_with("missing"));
        if missing {
            return Err(LoaderError::NotFound(path.to_path_buf()));
        }

        let SyntheticTerrainConfig {
            width,
            height,
            extent,
            origin,
            ..
        } = self.config;
        let step_x = extent as f64 / (width.max(2) - 1) as f64;
        let step_z = extent as f64 / (height.max(2) - 1) as f64;

        let mut heights = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height {
            for column in 0..width {
                let x = origin.0 as f64 + column as f64 * step_x;
                let z = origin.1 as f64 + row as f64 * step_z;
                heights.push(self.height_at(x, z));
            }
        }

        Heightmap::new(
            heights,
            width,
            height,
            origin,
            (origin.0 + extent, origin.1 + extent),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heightmap_validation() {
        assert!(Heightmap::new(vec![0.0; 3], 2, 2, (0.0, 0.0), (1.0, 1.0)).is_err());
        assert!(Heightmap::new(vec![0.0; 4], 2, 2, (1.0, 0.0), (1.0, 1.0)).is_err());
        assert!(Heightmap::new(vec![f32::NAN; 4], 2, 2, (0.0, 0.0), (1.0, 1.0)).is_err());
        let map = Heightmap::new(vec![0.0, 1.0, 2.0, 3.0], 2, 2, (0.0, 0.0), (10.0, 10.0)).unwrap();
        assert_eq!(map.bounds.min.y, 0.0);
        assert_eq!(map.bounds.max.y, 3.0);
        assert_eq!(map.transform[1], 10.0);
    }

    #[test]
    fn test_bilinear_sample() {
        let map = Heightmap::new(vec![0.0, 10.0, 20.0, 30.0], 2, 2, (0.0, 0.0), (10.0, 10.0)).unwrap();
        assert_eq!(map.sample(0.0, 0.0), 0.0);
        assert_eq!(map.sample(10.0, 10.0), 30.0);
        assert!((map.sample(5.0, 5.0) - 15.0).abs() < 1e-4);
        // Clamped outside the grid
        assert_eq!(map.sample(-50.0, -50.0), 0.0);
    }

    #[test]
    fn test_synthetic_loader() {
        let loader = SyntheticHeightmapLoader::new(SyntheticTerrainConfig {
            width: 64,
            height: 32,
            ..Default::default()
        });
        let map = loader.load(Path::new("alps.synthetic")).unwrap();
        assert_eq!(map.heights.len(), 64 * 32);
        assert!(map.heights.iter().all(|h| *h >= 0.0));
        assert_eq!(map.bounds.max.x, 4096.0);

        let again = loader.load(Path::new("alps.synthetic")).unwrap();
        assert_eq!(map.heights, again.heights);

        assert!(matches!(
            loader.load(Path::new("data/missing.tif")),
            Err(LoaderError::NotFound(_))
        ));
    }
}
