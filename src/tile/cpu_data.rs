use super::TileResult;
use crate::error::EngineError;
use glam::Vec3;
use rayon::prelude::*;

/// Host-side samples of one tile
#[derive(Debug, Clone)]
pub struct TileCpuData {
    /// Row-major `width * height` elevations
    pub heights: Vec<f32>,
    /// One unit normal per sample, empty until computed
    pub normals: Vec<[f32; 3]>,
    /// Optional RGBA8 colors, one per sample
    pub colors: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub height_scale: f32,
    pub min_height: f32,
    pub max_height: f32,
}

impl TileCpuData {
    pub fn new(heights: Vec<f32>, width: u32, height: u32, height_scale: f32) -> TileResult<Self> {
        if width < 2 || height < 2 {
            return Err(EngineError::InvalidConfig {
                field: "tile_resolution".to_string(),
                reason: format!("tile grid {}x{} is smaller than 2x2", width, height),
            });
        }
        let expected = width as usize * height as usize;
        if heights.len() != expected {
            return Err(EngineError::Internal {
                message: format!(
                    "height array has {} samples, expected {}",
                    heights.len(),
                    expected
                ),
            });
        }

        let (min_height, max_height) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));

        Ok(Self {
            heights,
            normals: Vec::new(),
            colors: Vec::new(),
            width,
            height,
            height_scale,
            min_height,
            max_height,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn height_at(&self, column: u32, row: u32) -> f32 {
        let column = column.min(self.width - 1) as usize;
        let row = row.min(self.height - 1) as usize;
        self.heights[row * self.width as usize + column]
    }

    /// Central-difference normals for a grid with the given world spacing
    pub fn compute_normals(&mut self, spacing_x: f32, spacing_z: f32) {
        let width = self.width;
        let height = self.height;
        let scale = self.height_scale;
        let data = &*self;

        let normals: Vec<[f32; 3]> = (0..height)
            .into_par_iter()
            .flat_map_iter(|row| {
                (0..width).map(move |column| {
                    let left = data.height_at(column.saturating_sub(1), row);
                    let right = data.height_at(column + 1, row);
                    let down = data.height_at(column, row.saturating_sub(1));
                    let up = data.height_at(column, row + 1);

                    let span_x = if column == 0 || column == width - 1 { 1.0 } else { 2.0 };
                    let span_z = if row == 0 || row == height - 1 { 1.0 } else { 2.0 };
                    let dhdx = (right - left) * scale / (span_x * spacing_x);
                    let dhdz = (up - down) * scale / (span_z * spacing_z);

                    Vec3::new(-dhdx, 1.0, -dhdz).normalize().to_array()
                })
            })
            .collect();

        self.normals = normals;
    }

    pub fn set_colors(&mut self, colors: Vec<u8>) -> TileResult<()> {
        if colors.len() != self.sample_count() * 4 {
            return Err(EngineError::Internal {
                message: format!(
                    "color array has {} bytes, expected {}",
                    colors.len(),
                    self.sample_count() * 4
                ),
            });
        }
        self.colors = colors;
        Ok(())
    }

    /// Bytes held on the host
    pub fn memory_usage(&self) -> u64 {
        (self.heights.len() * std::mem::size_of::<f32>()
            + self.normals.len() * std::mem::size_of::<[f32; 3]>()
            + self.colors.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mismatched_arrays() {
        assert!(TileCpuData::new(vec![0.0; 3], 2, 2, 1.0).is_err());
        assert!(TileCpuData::new(vec![0.0; 1], 1, 1, 1.0).is_err());
        let data = TileCpuData::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2, 1.0).unwrap();
        assert_eq!(data.min_height, 1.0);
        assert_eq!(data.max_height, 4.0);
        assert_eq!(data.height_at(1, 1), 4.0);
    }

    #[test]
    fn test_flat_terrain_normals_point_up() {
        let mut data = TileCpuData::new(vec![10.0; 16], 4, 4, 1.0).unwrap();
        data.compute_normals(1.0, 1.0);
        assert_eq!(data.normals.len(), 16);
        assert!(data.normals.iter().all(|n| *n == [0.0, 1.0, 0.0]));
        assert_eq!(data.memory_usage(), 16 * 4 + 16 * 12);
    }

    #[test]
    fn test_slope_normals_lean_downhill() {
        // Height rises along +x
        let heights: Vec<f32> = (0..9).map(|i| (i % 3) as f32).collect();
        let mut data = TileCpuData::new(heights, 3, 3, 1.0).unwrap();
        data.compute_normals(1.0, 1.0);
        let center = data.normals[4];
        assert!(center[0] < 0.0);
        assert!(center[2].abs() < 1e-6);
    }

    #[test]
    fn test_colors_must_match_samples() {
        let mut data = TileCpuData::new(vec![0.0; 4], 2, 2, 1.0).unwrap();
        assert!(data.set_colors(vec![0; 15]).is_err());
        assert!(data.set_colors(vec![255; 16]).is_ok());
    }
}
