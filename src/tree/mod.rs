//! Disk-paged R*-tree internals.
//!
//! The tree stores nodes as fixed-size pages behind a [`store::PageStore`]:
//! - page-based node storage with checksummed framing
//! - LRU cache for hot pages, loaded lazily on demand
//! - R*-family insertion (overlap-aware ChooseSubtree, margin-minimizing
//!   splits, forced reinsertion) and deletion with tree condensation
//! - bottom-up sort-tile bulk loading
//!
//! The engine assumes fetches are idempotent and writes durable once
//! acknowledged; everything else about the store (caching, eviction, retry)
//! is opaque to it.

pub mod constants;
pub mod types;
pub mod cache;
pub mod storage;
pub mod store;
mod rstar;

pub use constants::DEFAULT_CACHE_PAGES;
pub use rstar::{IntegrityReport, RStarTree};
pub use store::{FilePageStore, MemoryPageStore, PageStore, StoreStats};
pub use types::{
    DirectoryEntry, FileHeader, LeafEntry, Node, ObjectId, PageId, SpatialError, SpatialResult,
    TreeConfig, TreeState,
};
