//! Fixed base mesh shared by every tile.
//!
//! The grid resolution does not depend on the dataset; detail comes from
//! sampling the height texture and tessellating the quad patches.

use super::TileBounds;
use bytemuck::{Pod, Zeroable};

/// Base grid vertices along each tile edge
pub const VERTICES_PER_SIDE: u32 = 64;

/// Control points per quad patch
pub const PATCH_CONTROL_POINTS: u32 = 4;

/// Indices needed for `(N-1) x (N-1)` quad patches
pub const PATCH_INDEX_COUNT: u32 =
    (VERTICES_PER_SIDE - 1) * (VERTICES_PER_SIDE - 1) * PATCH_CONTROL_POINTS;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
}

/// Flat grid over the tile footprint at the tile's minimum elevation
pub fn base_grid_vertices(bounds: &TileBounds) -> Vec<TerrainVertex> {
    let n = VERTICES_PER_SIDE;
    let step = 1.0 / (n - 1) as f32;
    let size = bounds.size();

    let mut vertices = Vec::with_capacity((n * n) as usize);
    for row in 0..n {
        for column in 0..n {
            let u = column as f32 * step;
            let v = row as f32 * step;
            vertices.push(TerrainVertex {
                position: [
                    bounds.min.x + u * size.x,
                    bounds.min.y,
                    bounds.min.z + v * size.z,
                ],
                texcoord: [u, v],
                normal: [0.0, 1.0, 0.0],
            });
        }
    }
    vertices
}

/// Counter-clockwise control points for every quad patch of the grid
pub fn patch_indices() -> Vec<u32> {
    let n = VERTICES_PER_SIDE;
    let mut indices = Vec::with_capacity(PATCH_INDEX_COUNT as usize);
    for row in 0..n - 1 {
        for column in 0..n - 1 {
            let top_left = row * n + column;
            indices.extend_from_slice(&[top_left, top_left + n, top_left + n + 1, top_left + 1]);
        }
    }
    indices
}
