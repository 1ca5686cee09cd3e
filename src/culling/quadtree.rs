//! CPU quadtree over tile bounds
//!
//! Splits on the x/z plane. Nodes keep the full y range of the root so a
//! node box always encloses the parts of its objects that fall inside it.

use super::{level_for_distance, Frustum};
use crate::tile::TileBounds;
use glam::Vec3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadTreeStats {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub max_depth: u32,
    /// Object references, counting straddlers once per leaf
    pub total_objects: usize,
    pub average_objects_per_leaf: f32,
}

struct QuadNode {
    bounds: TileBounds,
    depth: u32,
    objects: Vec<(u64, TileBounds)>,
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(bounds: TileBounds, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            objects: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, id: u64, bounds: TileBounds, max_objects: usize, max_depth: u32) {
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.bounds.intersects_xz(&bounds) {
                    child.insert(id, bounds, max_objects, max_depth);
                }
            }
            return;
        }

        self.objects.push((id, bounds));
        if self.objects.len() > max_objects && self.depth < max_depth {
            self.subdivide(max_objects, max_depth);
        }
    }

    fn subdivide(&mut self, max_objects: usize, max_depth: u32) {
        let min = self.bounds.min;
        let max = self.bounds.max;
        let mid = self.bounds.center();
        let depth = self.depth + 1;

        let quadrant = |x0: f32, z0: f32, x1: f32, z1: f32| {
            QuadNode::new(
                TileBounds::new(Vec3::new(x0, min.y, z0), Vec3::new(x1, max.y, z1)),
                depth,
            )
        };
        let mut children = Box::new([
            quadrant(min.x, min.z, mid.x, mid.z),
            quadrant(mid.x, min.z, max.x, mid.z),
            quadrant(min.x, mid.z, mid.x, max.z),
            quadrant(mid.x, mid.z, max.x, max.z),
        ]);

        for (id, bounds) in self.objects.drain(..) {
            for child in children.iter_mut() {
                if child.bounds.intersects_xz(&bounds) {
                    child.insert(id, bounds, max_objects, max_depth);
                }
            }
        }
        self.children = Some(children);
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.objects.len();
        self.objects.retain(|(object, _)| *object != id);
        let mut removed = self.objects.len() != before;
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                removed |= child.remove(id);
            }
        }
        removed
    }

    fn cull_frustum(&self, frustum: &Frustum, out: &mut Vec<u64>) {
        // Everything below a rejected node is culled without per-object tests
        if !frustum.is_box_visible(&self.bounds) {
            return;
        }
        match &self.children {
            Some(children) => {
                for child in children.iter() {
                    child.cull_frustum(frustum, out);
                }
            }
            None => out.extend(
                self.objects
                    .iter()
                    .filter(|(_, bounds)| frustum.is_box_visible(bounds))
                    .map(|(id, _)| *id),
            ),
        }
    }

    fn cull_lod(&self, eye: Vec3, near: f32, max_level: u32, reach: f32, out: &mut Vec<(u64, u32)>) {
        if self.bounds.distance_to_point(eye) > reach {
            return;
        }
        match &self.children {
            Some(children) => {
                for child in children.iter() {
                    child.cull_lod(eye, near, max_level, reach, out);
                }
            }
            None => {
                for (id, bounds) in &self.objects {
                    let distance = bounds.distance_to_point(eye);
                    if distance <= reach {
                        out.push((*id, level_for_distance(distance, near, max_level)));
                    }
                }
            }
        }
    }

    fn collect_stats(&self, stats: &mut QuadTreeStats) {
        stats.total_nodes += 1;
        stats.max_depth = stats.max_depth.max(self.depth);
        match &self.children {
            Some(children) => children.iter().for_each(|child| child.collect_stats(stats)),
            None => {
                stats.leaf_nodes += 1;
                stats.total_objects += self.objects.len();
            }
        }
    }
}

pub struct QuadTree {
    root: QuadNode,
    max_objects: usize,
    max_depth: u32,
    len: usize,
}

impl QuadTree {
    pub fn new(bounds: TileBounds, max_objects: usize, max_depth: u32) -> Self {
        Self {
            root: QuadNode::new(bounds, 0),
            max_objects: max_objects.max(1),
            max_depth,
            len: 0,
        }
    }

    /// Tree whose root encloses every box in `objects`, ids are indices
    pub fn from_bounds(objects: &[TileBounds], max_objects: usize, max_depth: u32) -> Self {
        let root = objects
            .iter()
            .copied()
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default();
        let mut tree = Self::new(root, max_objects, max_depth);
        for (index, bounds) in objects.iter().enumerate() {
            tree.insert(index as u64, *bounds);
        }
        tree
    }

    pub fn bounds(&self) -> &TileBounds {
        &self.root.bounds
    }

    /// Rejects objects not fully inside the root box
    pub fn insert(&mut self, id: u64, bounds: TileBounds) -> bool {
        if !self.root.bounds.contains(&bounds) {
            log::trace!("[QuadTree] Object {} lies outside the root bounds", id);
            return false;
        }
        self.root.insert(id, bounds, self.max_objects, self.max_depth);
        self.len += 1;
        true
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let removed = self.root.remove(id);
        if removed {
            self.len -= 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.root = QuadNode::new(self.root.bounds, 0);
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ids of visible objects, ascending and unique
    pub fn cull_frustum(&self, frustum: &Frustum) -> Vec<u64> {
        let mut visible = Vec::new();
        self.root.cull_frustum(frustum, &mut visible);
        visible.sort_unstable();
        visible.dedup();
        visible
    }

    /// `(id, level)` for objects within the outermost band around `eye`
    pub fn cull_lod(&self, eye: Vec3, near: f32, max_level: u32) -> Vec<(u64, u32)> {
        let reach = super::level_distance(near, max_level);
        let mut selected = Vec::new();
        self.root.cull_lod(eye, near, max_level, reach, &mut selected);
        selected.sort_unstable();
        selected.dedup();
        selected
    }

    pub fn statistics(&self) -> QuadTreeStats {
        let mut stats = QuadTreeStats::default();
        self.root.collect_stats(&mut stats);
        if stats.leaf_nodes > 0 {
            stats.average_objects_per_leaf = stats.total_objects as f32 / stats.leaf_nodes as f32;
        }
        stats
    }
}
