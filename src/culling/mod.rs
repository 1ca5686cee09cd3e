/// Spatial Culling and LOD Selection
///
/// A CPU quadtree and a GPU compute pass, both classifying boxes against
/// the same frustum contract, plus the camera-driven candidate generation
/// that feeds them.

pub mod backend;
pub mod candidates;
pub mod frustum;
pub mod gpu_culler;
pub mod lod;
pub mod quadtree;

pub use backend::{classify_cpu, CullingBackend};
pub use candidates::{
    enumerate_candidates, generate_visible_candidates, max_candidate_level, select_visible,
    CandidateParams, TileCandidate,
};
pub use frustum::{Frustum, Plane};
pub use gpu_culler::{
    CullableObjectGpu, CullingParamsGpu, FrustumPlaneGpu, GpuCuller, CULLING_WORKGROUP_SIZE,
};
pub use lod::{level_distance, level_for_distance, lod_distances, lod_for_distance};
pub use quadtree::{QuadTree, QuadTreeStats};
