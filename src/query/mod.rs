//! Query engines over the tree's read primitives.
//!
//! Both engines are branch-and-bound traversals pruned by the spatial
//! distance capability's MINDIST primitive. They run against a shared tree
//! reference; the facade takes care of excluding writers while a scan is in
//! flight.

mod knn;
mod range;

pub use knn::KnnScan;
pub use range::RangeScan;
