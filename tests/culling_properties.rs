use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use terrain_streamer::camera::{build_frustum, init_camera_at, transform};
use terrain_streamer::culling::{
    classify_cpu, enumerate_candidates, generate_visible_candidates, CandidateParams,
    CullingBackend, QuadTree,
};
use terrain_streamer::tile::TileBounds;

fn random_box(rng: &mut StdRng, spread: f32) -> TileBounds {
    let min = Vec3::new(
        rng.gen_range(-spread..spread),
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-spread..spread),
    );
    let size = Vec3::new(
        rng.gen_range(1.0..200.0),
        rng.gen_range(1.0..100.0),
        rng.gen_range(1.0..200.0),
    );
    TileBounds::new(min, min + size)
}

fn params(max_distance: f32) -> CandidateParams {
    CandidateParams {
        tile_size: 256.0,
        near_distance: 256.0,
        max_distance,
        max_visible_tiles: 100_000,
        min_elevation: 0.0,
        max_elevation: 100.0,
        dataset_bounds: None,
    }
}

#[test]
fn test_box_behind_camera_is_culled() {
    // Looking along -z from the origin
    let camera = init_camera_at(Vec3::ZERO, 800, 600);
    let frustum = build_frustum(&camera);

    let behind = TileBounds::new(Vec3::new(-10.0, -10.0, 50.0), Vec3::new(10.0, 10.0, 70.0));
    let ahead = TileBounds::new(Vec3::new(-10.0, -10.0, -70.0), Vec3::new(10.0, 10.0, -50.0));
    assert!(!frustum.is_box_visible(&behind));
    assert!(frustum.is_box_visible(&ahead));
}

#[test]
fn test_box_around_eye_is_visible() {
    let camera = init_camera_at(Vec3::new(100.0, 20.0, 100.0), 800, 600);
    let camera = transform::rotate(&camera, 1.3, -0.4);
    let frustum = build_frustum(&camera);

    let around = TileBounds::new(Vec3::new(90.0, 0.0, 90.0), Vec3::new(110.0, 40.0, 110.0));
    assert!(frustum.is_box_visible(&around));
}

#[test]
fn test_cpu_classification_matches_box_test() {
    let mut rng = StdRng::seed_from_u64(3);
    let camera = init_camera_at(Vec3::new(0.0, 30.0, 0.0), 1280, 720);
    let camera = transform::rotate(&camera, 0.7, -0.2);
    let frustum = build_frustum(&camera);

    let boxes: Vec<TileBounds> = (0..2000).map(|_| random_box(&mut rng, 3000.0)).collect();
    let flags = classify_cpu(&frustum, &boxes);
    assert_eq!(flags.len(), boxes.len());
    for (bounds, visible) in boxes.iter().zip(&flags) {
        assert_eq!(*visible, frustum.is_box_visible(bounds));
    }
    assert!(flags.iter().any(|&v| v));
    assert!(flags.iter().any(|&v| !v));

    assert_eq!(CullingBackend::cpu().classify(&frustum, &boxes), flags);
}

#[test]
fn test_quadtree_agrees_with_brute_force() {
    let mut rng = StdRng::seed_from_u64(11);
    let camera = init_camera_at(Vec3::new(500.0, 80.0, 500.0), 1280, 720);
    let camera = transform::rotate(&camera, -2.1, -0.3);
    let frustum = build_frustum(&camera);

    let boxes: Vec<TileBounds> = (0..1500).map(|_| random_box(&mut rng, 2000.0)).collect();
    let expected: Vec<u64> = boxes
        .iter()
        .enumerate()
        .filter(|(_, bounds)| frustum.is_box_visible(bounds))
        .map(|(id, _)| id as u64)
        .collect();
    assert!(!expected.is_empty());

    // A single leaf tests every box directly
    let flat = QuadTree::from_bounds(&boxes, 8, 0);
    assert_eq!(flat.cull_frustum(&frustum), expected);

    // Subdivided trees only ever drop boxes the frustum rejects piecewise
    let tree = QuadTree::from_bounds(&boxes, 8, 8);
    assert_eq!(tree.len(), boxes.len());
    assert!(tree.statistics().leaf_nodes > 1);
    let visible = tree.cull_frustum(&frustum);
    assert!(!visible.is_empty());
    for id in &visible {
        assert!(expected.binary_search(id).is_ok());
    }
}

#[test]
fn test_candidate_count_grows_with_distance() {
    let dataset: Arc<str> = Arc::from("dem");
    let eye = Vec3::new(37.0, 120.0, -415.0);

    let mut previous = 0;
    for step in 1..=16 {
        let count = enumerate_candidates(eye, &params(step as f32 * 250.0), &dataset).len();
        assert!(count >= previous, "{} candidates after {}", count, previous);
        previous = count;
    }
    assert!(previous > 0);
}

#[test]
fn test_selection_is_capped_and_nearest_first() {
    let dataset: Arc<str> = Arc::from("dem");
    let camera = init_camera_at(Vec3::new(0.0, 200.0, 0.0), 1280, 720);
    let camera = transform::rotate(&camera, 0.0, -0.5);
    let frustum = build_frustum(&camera);
    let eye = Vec3::new(0.0, 200.0, 0.0);

    let mut limited = params(4000.0);
    limited.max_visible_tiles = 12;
    let (selected, total) = generate_visible_candidates(
        Some(&frustum),
        eye,
        &limited,
        &dataset,
        &CullingBackend::cpu(),
    );

    assert!(total > selected.len());
    assert_eq!(selected.len(), 12);
    for pair in selected.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    for candidate in &selected {
        assert!(frustum.is_box_visible(&candidate.bounds));
    }
}
