//! Distance to LOD band mapping

use crate::tile::MAX_LOD;

/// Linear map of `distance` onto `[0, MAX_LOD]`, clamped at `near`/`far`
pub fn lod_for_distance(distance: f32, near: f32, far: f32) -> u32 {
    if far <= near {
        return 0;
    }
    let t = ((distance - near) / (far - near)).clamp(0.0, 1.0);
    (t * MAX_LOD as f32).round() as u32
}

/// Smallest level whose band `near * 2^level` still reaches past `distance`
pub fn level_for_distance(distance: f32, near: f32, max_level: u32) -> u32 {
    (0..max_level)
        .find(|&level| distance < level_distance(near, level))
        .unwrap_or(max_level)
}

/// Outer radius of a level's band
pub fn level_distance(near: f32, level: u32) -> f32 {
    near * (1u32 << level.min(31)) as f32
}

/// Band radii for levels `0..=max_level`
pub fn lod_distances(near: f32, max_level: u32) -> Vec<f32> {
    (0..=max_level).map(|level| level_distance(near, level)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lod_for_distance_clamps() {
        assert_eq!(lod_for_distance(0.0, 100.0, 800.0), 0);
        assert_eq!(lod_for_distance(100.0, 100.0, 800.0), 0);
        assert_eq!(lod_for_distance(450.0, 100.0, 800.0), 4);
        assert_eq!(lod_for_distance(800.0, 100.0, 800.0), 7);
        assert_eq!(lod_for_distance(5000.0, 100.0, 800.0), 7);
        assert_eq!(lod_for_distance(10.0, 100.0, 100.0), 0);
    }

    #[test]
    fn test_level_bands_double() {
        assert_eq!(level_for_distance(50.0, 100.0, 7), 0);
        assert_eq!(level_for_distance(100.0, 100.0, 7), 1);
        assert_eq!(level_for_distance(399.0, 100.0, 7), 2);
        assert_eq!(level_for_distance(1e9, 100.0, 3), 3);
        assert_eq!(lod_distances(100.0, 2), vec![100.0, 200.0, 400.0]);
    }
}
