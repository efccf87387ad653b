//! The vector relation the index is built over.
//!
//! The index never copies the relation; it reads single vectors at leaf
//! entry construction and at delete-time lookup.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::tree::types::{ObjectId, SpatialError, SpatialResult};

/// Maps object identifiers to coordinate vectors.
pub trait VectorRelation: Send + Sync {
    /// The coordinate vector of `id`, if the relation holds it.
    fn get(&self, id: ObjectId) -> Option<Vec<f64>>;

    /// Dimensionality of every vector in the relation.
    fn dims(&self) -> usize;
}

/// An in-memory relation backed by a hash map.
pub struct MemoryRelation {
    dims: usize,
    vectors: RwLock<HashMap<ObjectId, Vec<f64>>>,
}

impl MemoryRelation {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Stores a vector, replacing any previous one for `id`.
    pub fn put(&self, id: ObjectId, vector: Vec<f64>) -> SpatialResult<()> {
        if vector.len() != self.dims {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.vectors.write().insert(id, vector);
        Ok(())
    }

    pub fn remove(&self, id: ObjectId) -> Option<Vec<f64>> {
        self.vectors.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }
}

impl VectorRelation for MemoryRelation {
    fn get(&self, id: ObjectId) -> Option<Vec<f64>> {
        self.vectors.read().get(&id).cloned()
    }

    fn dims(&self) -> usize {
        self.dims
    }
}
