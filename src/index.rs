//! The spatial index facade.
//!
//! Wraps the tree engine against a specific vector relation: converts
//! object identifiers into spatial leaf entries, decides between bulk and
//! incremental insertion, and negotiates query capability with callers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::distance::DistanceFunction;
use crate::query::{KnnScan, RangeScan};
use crate::relation::VectorRelation;
use crate::tree::store::PageStore;
use crate::tree::types::{LeafEntry, ObjectId, SpatialError, SpatialResult, TreeConfig};
use crate::tree::{IntegrityReport, RStarTree};

/// A disk-paged spatial index over a vector relation.
///
/// One writer XOR many readers: mutations take the internal lock
/// exclusively for their full duration (including cascading splits and
/// condensation), queries share it. Queries are accepted only when the
/// supplied distance function carries the spatial capability and the query
/// center matches the indexed dimensionality; otherwise the query
/// constructor declines with `None` and the caller is expected to fall back
/// to a linear scan.
pub struct SpatialIndex<R: VectorRelation, S: PageStore> {
    relation: Arc<R>,
    tree: RwLock<RStarTree<S>>,
}

impl<R: VectorRelation, S: PageStore> SpatialIndex<R, S> {
    /// Creates an empty index over `relation`, persisting into `store`.
    pub fn new(relation: Arc<R>, store: S, config: TreeConfig) -> SpatialResult<Self> {
        let tree = RStarTree::create(store, relation.dims(), config)?;
        Ok(Self {
            relation,
            tree: RwLock::new(tree),
        })
    }

    /// Reopens an index previously persisted into `store`.
    pub fn open(relation: Arc<R>, store: S, config: TreeConfig) -> SpatialResult<Self> {
        let tree = RStarTree::open(store, config)?;
        if tree.dims() != relation.dims() {
            return Err(SpatialError::DimensionMismatch {
                expected: relation.dims(),
                actual: tree.dims(),
            });
        }
        Ok(Self {
            relation,
            tree: RwLock::new(tree),
        })
    }

    /// Indexes the object `id` at its current vector in the relation.
    pub fn insert(&self, id: ObjectId) -> SpatialResult<()> {
        let entry = self.leaf_entry(id)?;
        self.tree.write().insert(entry)
    }

    /// Indexes a batch of objects. Batches of 0 or 1 entries are a no-op.
    /// An empty tree is bulk-built bottom-up; otherwise entries are
    /// inserted one at a time.
    ///
    /// Not transactional: a mid-batch failure leaves the completed
    /// insertions in place.
    pub fn insert_all(&self, ids: &[ObjectId]) -> SpatialResult<()> {
        if ids.len() <= 1 {
            return Ok(());
        }

        let mut tree = self.tree.write();
        if tree.is_empty() {
            let entries = ids
                .iter()
                .map(|&id| self.leaf_entry(id))
                .collect::<SpatialResult<Vec<_>>>()?;
            tree.bulk_load(entries)
        } else {
            for &id in ids {
                let entry = self.leaf_entry(id)?;
                tree.insert(entry)?;
            }
            Ok(())
        }
    }

    /// Removes the object `id` from the index. Returns whether an entry was
    /// found and removed; an id unknown to the relation or the index is not
    /// an error.
    pub fn delete(&self, id: ObjectId) -> SpatialResult<bool> {
        let Some(vector) = self.relation.get(id) else {
            return Ok(false);
        };
        self.tree.write().remove(&vector, id)
    }

    /// Removes a batch of objects one at a time, each deletion leaving the
    /// tree fully condensed. Returns how many entries were removed.
    pub fn delete_all(&self, ids: &[ObjectId]) -> SpatialResult<usize> {
        let mut removed = 0;
        for &id in ids {
            if self.delete(id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Runs a range query, returning all `(id, distance)` pairs within
    /// `radius` of `center`, unordered.
    ///
    /// Declines with `None` when `distance` has no spatial capability or
    /// `center` does not match the indexed dimensionality.
    pub fn range_query(
        &self,
        distance: &dyn DistanceFunction,
        center: &[f64],
        radius: f64,
    ) -> Option<SpatialResult<Vec<(ObjectId, f64)>>> {
        let spatial = distance.as_spatial()?;
        if center.len() != self.dims() {
            return None;
        }
        let tree = self.tree.read();
        Some(RangeScan::new(&tree, spatial).run(center, radius))
    }

    /// Runs a k-nearest-neighbor query, returning the `k` nearest objects
    /// (or fewer if the index holds fewer), ordered by ascending distance,
    /// ties broken by identifier.
    ///
    /// Declines with `None` under the same conditions as
    /// [`SpatialIndex::range_query`].
    pub fn knn_query(
        &self,
        distance: &dyn DistanceFunction,
        center: &[f64],
        k: usize,
    ) -> Option<SpatialResult<Vec<(ObjectId, f64)>>> {
        let spatial = distance.as_spatial()?;
        if center.len() != self.dims() {
            return None;
        }
        let tree = self.tree.read();
        Some(KnnScan::new(&tree, spatial).run(center, k))
    }

    /// Number of indexed entries.
    pub fn len(&self) -> u64 {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Tree height: 0 for an empty index, 1 for a single root leaf.
    pub fn height(&self) -> u32 {
        self.tree.read().height()
    }

    /// Dimensionality the index was built over.
    pub fn dims(&self) -> usize {
        self.tree.read().dims()
    }

    /// Full structural sweep; expensive, intended for tests and explicit
    /// maintenance after large batches.
    pub fn check_integrity(&self) -> SpatialResult<IntegrityReport> {
        self.tree.read().check_integrity()
    }

    /// Flushes the persisted state and all dirty pages.
    pub fn flush(&self) -> SpatialResult<()> {
        self.tree.read().flush()
    }

    /// Flushes and closes the index; subsequent operations fail with
    /// [`SpatialError::Closed`].
    pub fn close(&self) -> SpatialResult<()> {
        self.tree.write().close()
    }

    fn leaf_entry(&self, id: ObjectId) -> SpatialResult<LeafEntry> {
        let vector = self
            .relation
            .get(id)
            .ok_or(SpatialError::MissingVector(id))?;
        Ok(LeafEntry::new(id, vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{CosineDistance, EuclideanDistance};
    use crate::relation::MemoryRelation;
    use crate::tree::store::MemoryPageStore;

    fn small_index() -> SpatialIndex<MemoryRelation, MemoryPageStore> {
        let relation = Arc::new(MemoryRelation::new(2));
        relation.put(0, vec![0.0, 0.0]).unwrap();
        relation.put(1, vec![1.0, 1.0]).unwrap();
        relation.put(2, vec![2.0, 2.0]).unwrap();
        relation.put(3, vec![10.0, 10.0]).unwrap();

        let config = TreeConfig::new(3).with_min_entries(1);
        SpatialIndex::new(relation, MemoryPageStore::new(), config).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        // Points (0,0),(1,1),(2,2),(10,10) with M=3, m=1
        let index = small_index();
        for id in 0..4 {
            index.insert(id).unwrap();
        }
        assert_eq!(index.len(), 4);

        let distance = EuclideanDistance;

        let mut hits = index
            .range_query(&distance, &[0.0, 0.0], 1.5)
            .expect("euclidean is spatial")
            .unwrap();
        hits.sort_by_key(|(id, _)| *id);
        let ids: Vec<u64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1]);

        let knn = index
            .knn_query(&distance, &[0.0, 0.0], 2)
            .expect("euclidean is spatial")
            .unwrap();
        let ids: Vec<u64> = knn.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1], "ordered by ascending distance");

        assert!(index.delete(1).unwrap());
        let hits = index
            .range_query(&distance, &[0.0, 0.0], 1.5)
            .unwrap()
            .unwrap();
        let ids: Vec<u64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_capability_negotiation() {
        let index = small_index();
        index.insert_all(&[0, 1, 2, 3]).unwrap();

        // Non-spatial distance is declined, not an error
        assert!(index
            .range_query(&CosineDistance, &[0.0, 0.0], 1.0)
            .is_none());
        assert!(index.knn_query(&CosineDistance, &[0.0, 0.0], 2).is_none());

        // Wrong dimensionality is declined too
        let distance = EuclideanDistance;
        assert!(index.range_query(&distance, &[0.0, 0.0, 0.0], 1.0).is_none());
        assert!(index.knn_query(&distance, &[0.0], 2).is_none());
    }

    #[test]
    fn test_insert_all_small_batches_are_noop() {
        let index = small_index();
        index.insert_all(&[]).unwrap();
        index.insert_all(&[0]).unwrap();
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_insert_all_bulk_then_incremental() {
        let index = small_index();
        index.insert_all(&[0, 1, 2]).unwrap();
        assert_eq!(index.len(), 3);

        // Non-empty tree takes the incremental path
        index.insert_all(&[3, 0]).unwrap();
        assert_eq!(index.len(), 5);
        assert!(index.check_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_insert_unknown_id_fails() {
        let index = small_index();
        assert!(matches!(
            index.insert(99),
            Err(SpatialError::MissingVector(99))
        ));
    }

    #[test]
    fn test_delete_unknown_id_is_false() {
        let index = small_index();
        index.insert(0).unwrap();
        assert!(!index.delete(99).unwrap());
        assert!(!index.delete(1).unwrap(), "in relation but not indexed");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_delete_all_counts() {
        let index = small_index();
        index.insert_all(&[0, 1, 2, 3]).unwrap();
        assert_eq!(index.delete_all(&[0, 1, 99]).unwrap(), 2);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_close_rejects_operations() {
        let index = small_index();
        index.insert(0).unwrap();
        index.close().unwrap();
        assert!(matches!(index.insert(1), Err(SpatialError::Closed)));
    }
}
