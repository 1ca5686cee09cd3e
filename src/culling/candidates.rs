//! Per-frame tile candidate generation
//!
//! Candidates are enumerated from the camera position alone, so their count
//! depends on view distance and tile size, never on the dataset size.

use super::{level_distance, level_for_distance, CullingBackend, Frustum};
use crate::tile::{TileBounds, TileCoordinate, MAX_LOD};
use glam::Vec3;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CandidateParams {
    pub tile_size: f32,
    /// Radius of the level-0 band; band `L` reaches `near_distance * 2^L`
    pub near_distance: f32,
    /// Enumeration radius around the camera
    pub max_distance: f32,
    pub max_visible_tiles: usize,
    /// Elevation range assumed for tiles that have not loaded yet
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// Footprint of the active dataset, candidates outside it are dropped
    pub dataset_bounds: Option<TileBounds>,
}

#[derive(Debug, Clone)]
pub struct TileCandidate {
    pub coordinate: TileCoordinate,
    pub bounds: TileBounds,
    /// Camera to nearest point of `bounds`
    pub distance: f32,
}

/// Highest level whose band starts inside `max_distance`
pub fn max_candidate_level(near_distance: f32, max_distance: f32) -> Option<u32> {
    (0..=MAX_LOD)
        .take_while(|&level| level_distance(near_distance, level) <= max_distance)
        .last()
}

/// Every grid cell within `eye ± max_distance` on each enabled level
pub fn enumerate_candidates(
    eye: Vec3,
    params: &CandidateParams,
    dataset_id: &Arc<str>,
) -> Vec<TileCandidate> {
    let Some(top_level) = max_candidate_level(params.near_distance, params.max_distance) else {
        return Vec::new();
    };

    let reach = params.max_distance;
    let mut candidates = Vec::new();
    for level in 0..=top_level {
        let edge = TileCoordinate::edge_length(level, params.tile_size);
        let x_range = cell_range(eye.x, reach, edge);
        let z_range = cell_range(eye.z, reach, edge);

        for y in z_range.clone() {
            for x in x_range.clone() {
                let coordinate = TileCoordinate::new(x, y, level, Arc::clone(dataset_id));
                let bounds = TileBounds::for_coordinate(
                    &coordinate,
                    params.tile_size,
                    params.min_elevation,
                    params.max_elevation,
                );
                if let Some(clip) = &params.dataset_bounds {
                    if !bounds.intersects_xz(clip) {
                        continue;
                    }
                }
                let distance = bounds.distance_to_point(eye);
                candidates.push(TileCandidate {
                    coordinate,
                    bounds,
                    distance,
                });
            }
        }
    }
    candidates
}

fn cell_range(center: f32, reach: f32, edge: f32) -> std::ops::RangeInclusive<i32> {
    let first = ((center - reach) / edge).floor() as i32;
    let last = ((center + reach) / edge).ceil() as i32 - 1;
    first..=last.max(first)
}

/// Frustum test, band and distance filter, nearest first, capped.
///
/// `visible` holds one flag per candidate; `None` keeps every candidate.
pub fn select_visible(
    candidates: Vec<TileCandidate>,
    visible: Option<&[bool]>,
    params: &CandidateParams,
) -> Vec<TileCandidate> {
    let top_level = max_candidate_level(params.near_distance, params.max_distance).unwrap_or(0);

    let mut selected: Vec<TileCandidate> = candidates
        .into_iter()
        .enumerate()
        .filter(|(index, _)| visible.map_or(true, |flags| flags.get(*index).copied().unwrap_or(false)))
        .map(|(_, candidate)| candidate)
        .filter(|candidate| candidate.distance <= params.max_distance)
        .filter(|candidate| {
            level_for_distance(candidate.distance, params.near_distance, top_level)
                == candidate.coordinate.level
        })
        .collect();

    selected.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.coordinate.cmp(&b.coordinate))
    });
    selected.truncate(params.max_visible_tiles);
    selected
}

/// Enumerate, classify with `backend` (when a frustum is given) and select
pub fn generate_visible_candidates(
    frustum: Option<&Frustum>,
    eye: Vec3,
    params: &CandidateParams,
    dataset_id: &Arc<str>,
    backend: &CullingBackend,
) -> (Vec<TileCandidate>, usize) {
    let candidates = enumerate_candidates(eye, params, dataset_id);
    let total = candidates.len();
    let flags = frustum.map(|frustum| {
        let bounds: Vec<TileBounds> = candidates.iter().map(|c| c.bounds).collect();
        backend.classify(frustum, &bounds)
    });
    let selected = select_visible(candidates, flags.as_deref(), params);
    (selected, total)
}
