//! Constants for the disk-paged R*-tree.

/// Default page size (16KB) - balances I/O efficiency and memory usage
pub const PAGE_SIZE: usize = 16384;

/// Default maximum number of entries per node.
///
/// A page must hold the serialized node; for high-dimensional points lower
/// this via `TreeConfig` so entries still fit in `PAGE_SIZE`.
pub const DEFAULT_MAX_ENTRIES: usize = 64;

/// Minimum fill as a fraction of the maximum fan-out
pub const MIN_FILL_RATIO: f64 = 0.4;

/// Fraction of entries removed on forced reinsertion
pub const REINSERT_RATIO: f64 = 0.3;

/// Target node fill when bulk loading
pub const BULK_LOAD_FILL: f64 = 0.75;

/// Default cache size in number of pages (16MB with 16KB pages)
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x50525354; // "PRST"

/// File format version
pub const VERSION: u32 = 1;
