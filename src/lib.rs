//! # paged-rstar - Disk-Paged R*-Tree Spatial Index
//!
//! This crate provides a balanced, disk-paged spatial index in the R*-tree
//! family, storing multidimensional point entries keyed by object
//! identifiers.
//!
//! ## Features
//!
//! - **Disk-Based Storage**: fixed-size checksummed pages behind a
//!   pluggable [`PageStore`], loaded on demand through an LRU cache
//! - **R\*-Family Insertion**: overlap-aware subtree choice,
//!   margin-minimizing splits, forced reinsertion
//! - **Bulk Loading**: bottom-up sort-tile packing for near-optimal fill
//! - **Deletion with Condensation**: underfull nodes are dissolved and
//!   their entries reinserted, keeping every bound tight
//! - **Capability-Gated Queries**: range and k-NN search accept only
//!   spatial (MINDIST-decomposable) distance functions and decline
//!   everything else so callers can fall back to a linear scan
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use paged_rstar::{
//!     EuclideanDistance, MemoryPageStore, MemoryRelation, SpatialIndex, TreeConfig,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let relation = Arc::new(MemoryRelation::new(2));
//! relation.put(1, vec![0.5, 0.5])?;
//! relation.put(2, vec![9.0, 9.0])?;
//!
//! let index = SpatialIndex::new(relation, MemoryPageStore::new(), TreeConfig::default())?;
//! index.insert_all(&[1, 2])?;
//!
//! let hits = index
//!     .range_query(&EuclideanDistance, &[0.0, 0.0], 1.0)
//!     .expect("euclidean distance is spatial")?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! For durable trees use [`FilePageStore`] instead of
//! [`MemoryPageStore`]; the index state (root pointer, height, entry
//! count, dimensionality) is persisted alongside the pages so the tree can
//! be reopened with [`SpatialIndex::open`].

// Core tree modules
pub mod mbr;
pub mod tree;

// Query engines
pub mod query;

// Index surface
pub mod distance;
pub mod index;
pub mod relation;

// Re-export geometry
pub use mbr::Mbr;

// Re-export tree types
pub use tree::{
    FilePageStore, IntegrityReport, LeafEntry, MemoryPageStore, Node, ObjectId, PageId,
    PageStore, RStarTree, SpatialError, SpatialResult, StoreStats, TreeConfig,
};

// Re-export query engines
pub use query::{KnnScan, RangeScan};

// Re-export distance capability
pub use distance::{
    CosineDistance, DistanceFunction, EuclideanDistance, ManhattanDistance, SpatialDistance,
};

// Re-export relation and facade
pub use index::SpatialIndex;
pub use relation::{MemoryRelation, VectorRelation};
