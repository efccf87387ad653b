//! k-nearest-neighbor query engine.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::distance::SpatialDistance;
use crate::tree::store::PageStore;
use crate::tree::types::{Node, ObjectId, PageId, SpatialResult};
use crate::tree::RStarTree;

/// A tree branch pending expansion, ordered by the minimum possible
/// distance from its bounding rectangle to the query center (MINDIST).
/// Page id breaks ties so traversal order is deterministic.
struct Branch {
    min_dist: f64,
    page: PageId,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Branch {}
impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Branch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.min_dist
            .total_cmp(&other.min_dist)
            .then(self.page.cmp(&other.page))
    }
}

/// A result candidate; ordered by distance, ties by identifier so results
/// are deterministic.
struct Neighbor {
    dist: f64,
    id: ObjectId,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Neighbor {}
impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist).then(self.id.cmp(&other.id))
    }
}

/// Finds the k nearest indexed points to a query center.
///
/// Priority traversal: a min-heap of branches keyed by MINDIST drives the
/// search while a bounded max-heap holds the best k candidates seen so far.
/// A branch whose MINDIST exceeds the current k-th best distance cannot
/// contain a closer point and is pruned; the search terminates when the
/// branch queue is empty or its head exceeds the bound.
pub struct KnnScan<'a, S: PageStore> {
    tree: &'a RStarTree<S>,
    distance: &'a dyn SpatialDistance,
}

impl<'a, S: PageStore> KnnScan<'a, S> {
    pub fn new(tree: &'a RStarTree<S>, distance: &'a dyn SpatialDistance) -> Self {
        Self { tree, distance }
    }

    /// Returns the `k` nearest objects (or fewer if the index holds fewer),
    /// ordered by ascending distance, ties broken by identifier.
    pub fn run(&self, center: &[f64], k: usize) -> SpatialResult<Vec<(ObjectId, f64)>> {
        if k == 0 || self.tree.root_page() == 0 {
            return Ok(Vec::new());
        }

        let mut branches: BinaryHeap<Reverse<Branch>> = BinaryHeap::new();
        let mut best: BinaryHeap<Neighbor> = BinaryHeap::new();

        branches.push(Reverse(Branch {
            min_dist: 0.0,
            page: self.tree.root_page(),
        }));

        while let Some(Reverse(branch)) = branches.pop() {
            if best.len() == k {
                let bound = best.peek().expect("k > 0").dist;
                if branch.min_dist > bound {
                    break;
                }
            }

            match self.tree.fetch(branch.page)? {
                Node::Leaf { entries } => {
                    for entry in entries {
                        let candidate = Neighbor {
                            dist: self.distance.distance(&entry.point, center),
                            id: entry.id,
                        };
                        if best.len() < k {
                            best.push(candidate);
                        } else if candidate < *best.peek().expect("k > 0") {
                            best.pop();
                            best.push(candidate);
                        }
                    }
                }
                Node::Directory { entries, .. } => {
                    for entry in entries {
                        let min_dist = self.distance.min_dist(&entry.mbr, center);
                        let admissible = match best.peek() {
                            Some(worst) if best.len() == k => min_dist <= worst.dist,
                            _ => true,
                        };
                        if admissible {
                            branches.push(Reverse(Branch {
                                min_dist,
                                page: entry.page_id,
                            }));
                        }
                    }
                }
            }
        }

        Ok(best
            .into_sorted_vec()
            .into_iter()
            .map(|n| (n.id, n.dist))
            .collect())
    }
}
