//! Range query engine.

use crate::distance::SpatialDistance;
use crate::tree::store::PageStore;
use crate::tree::types::{Node, ObjectId, SpatialResult};
use crate::tree::RStarTree;

/// Finds all indexed points within a radius of a query center.
///
/// Depth-first traversal: a branch is pruned when the minimum possible
/// distance from its bounding rectangle to the center already exceeds the
/// radius; a leaf entry is a hit iff its exact distance is within the
/// radius. The result set is unordered.
pub struct RangeScan<'a, S: PageStore> {
    tree: &'a RStarTree<S>,
    distance: &'a dyn SpatialDistance,
}

impl<'a, S: PageStore> RangeScan<'a, S> {
    pub fn new(tree: &'a RStarTree<S>, distance: &'a dyn SpatialDistance) -> Self {
        Self { tree, distance }
    }

    pub fn run(&self, center: &[f64], radius: f64) -> SpatialResult<Vec<(ObjectId, f64)>> {
        let mut results = Vec::new();
        if self.tree.root_page() == 0 {
            return Ok(results);
        }

        let mut stack = vec![self.tree.root_page()];
        while let Some(page) = stack.pop() {
            match self.tree.fetch(page)? {
                Node::Leaf { entries } => {
                    for entry in entries {
                        let dist = self.distance.distance(&entry.point, center);
                        if dist <= radius {
                            results.push((entry.id, dist));
                        }
                    }
                }
                Node::Directory { entries, .. } => {
                    for entry in entries {
                        if self.distance.min_dist(&entry.mbr, center) <= radius {
                            stack.push(entry.page_id);
                        }
                    }
                }
            }
        }
        Ok(results)
    }
}
