//! Page store contract and implementations.
//!
//! The tree engine never touches files directly; it talks to a [`PageStore`]
//! that persists fixed-size node pages and the index state. Fetch must be
//! idempotent and write durable once acknowledged. Caching and eviction are
//! the store's business, opaque to the engine, and I/O errors propagate
//! unmodified - retry policy belongs here, not in the index layer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::cache::PageCache;
use super::constants::DEFAULT_CACHE_PAGES;
use super::storage::Storage;
use super::types::{FileHeader, FreePage, Node, PageId, SpatialError, SpatialResult, TreeState};

/// Persistence contract consumed by the tree engine.
///
/// Implementations synchronize internally so the engine can read pages from
/// shared query traversals while mutation exclusivity is enforced one level
/// up, at the index facade.
pub trait PageStore: Send + Sync {
    /// Load the node stored at `page_id`.
    fn fetch(&self, page_id: PageId) -> SpatialResult<Node>;

    /// Reserve a fresh page id (possibly recycling a freed one).
    fn allocate(&self) -> SpatialResult<PageId>;

    /// Persist `node` at `page_id`.
    fn write(&self, page_id: PageId, node: &Node) -> SpatialResult<()>;

    /// Return `page_id` to the store for reuse.
    fn free(&self, page_id: PageId) -> SpatialResult<()>;

    /// Read the persisted index state, `None` for a store never written to.
    fn read_state(&self) -> SpatialResult<Option<TreeState>>;

    /// Persist the index state.
    fn write_state(&self, state: &TreeState) -> SpatialResult<()>;

    /// Flush everything pending to durable storage.
    fn sync(&self) -> SpatialResult<()>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// A page store holding everything in memory. No durability; intended for
/// tests and for trees that never outlive the process.
pub struct MemoryPageStore {
    pages: RwLock<HashMap<PageId, Node>>,
    state: RwLock<Option<TreeState>>,
    free_pages: Mutex<Vec<PageId>>,
    next_page_id: AtomicU64,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
            state: RwLock::new(None),
            free_pages: Mutex::new(Vec::new()),
            next_page_id: AtomicU64::new(1),
        }
    }

    /// Number of live (allocated, not freed) pages.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryPageStore {
    fn fetch(&self, page_id: PageId) -> SpatialResult<Node> {
        self.pages
            .read()
            .get(&page_id)
            .cloned()
            .ok_or_else(|| SpatialError::Corrupted(format!("page {page_id} does not exist")))
    }

    fn allocate(&self) -> SpatialResult<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        Ok(self.next_page_id.fetch_add(1, Ordering::Relaxed))
    }

    fn write(&self, page_id: PageId, node: &Node) -> SpatialResult<()> {
        self.pages.write().insert(page_id, node.clone());
        Ok(())
    }

    fn free(&self, page_id: PageId) -> SpatialResult<()> {
        self.pages.write().remove(&page_id);
        self.free_pages.lock().push(page_id);
        Ok(())
    }

    fn read_state(&self) -> SpatialResult<Option<TreeState>> {
        Ok(self.state.read().clone())
    }

    fn write_state(&self, state: &TreeState) -> SpatialResult<()> {
        *self.state.write() = Some(state.clone());
        Ok(())
    }

    fn sync(&self) -> SpatialResult<()> {
        Ok(())
    }
}

// ============================================================================
// File-Backed Store
// ============================================================================

/// Counters describing cache and disk behavior of a [`FilePageStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
}

/// A disk-backed page store: one fixed-size page per node, CRC32-framed,
/// with an LRU cache of hot pages and a persisted free list for page reuse.
pub struct FilePageStore {
    storage: Storage,
    cache: RwLock<PageCache>,
    header: RwLock<FileHeader>,
    stats: StoreCounters,
}

#[derive(Default)]
struct StoreCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
}

impl FilePageStore {
    /// Create a new store file for a `dims`-dimensional tree.
    pub fn create(path: impl AsRef<Path>, dims: usize) -> SpatialResult<Self> {
        Self::create_with_cache_size(path, dims, DEFAULT_CACHE_PAGES)
    }

    /// Create with custom cache size (number of pages)
    pub fn create_with_cache_size(
        path: impl AsRef<Path>,
        dims: usize,
        cache_pages: usize,
    ) -> SpatialResult<Self> {
        let storage = Storage::create(path.as_ref())?;
        let header = FileHeader::new(dims);
        storage.write_header(&header)?;
        storage.sync()?;
        log::debug!("created page store at {:?} ({} dims)", path.as_ref(), dims);

        Ok(Self {
            storage,
            cache: RwLock::new(PageCache::new(cache_pages)),
            header: RwLock::new(header),
            stats: StoreCounters::default(),
        })
    }

    /// Open an existing store. Only the header page is read; tree pages stay
    /// on disk until fetched.
    pub fn open(path: impl AsRef<Path>) -> SpatialResult<Self> {
        Self::open_with_cache_size(path, DEFAULT_CACHE_PAGES)
    }

    /// Open with custom cache size
    pub fn open_with_cache_size(
        path: impl AsRef<Path>,
        cache_pages: usize,
    ) -> SpatialResult<Self> {
        let storage = Storage::open(path.as_ref())?;
        let header = storage.read_header()?;
        header.validate()?;
        log::debug!("opened page store at {:?}", path.as_ref());

        Ok(Self {
            storage,
            cache: RwLock::new(PageCache::new(cache_pages)),
            header: RwLock::new(header),
            stats: StoreCounters::default(),
        })
    }

    /// Current cache/disk counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            cached_pages: self.cache.read().len() as u64,
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            disk_reads: self.stats.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.stats.disk_writes.load(Ordering::Relaxed),
        }
    }

    /// Add a node to cache, evicting (and writing back) old pages as needed.
    fn cache_node(&self, page_id: PageId, node: Node, dirty: bool) -> SpatialResult<()> {
        let mut cache = self.cache.write();

        while cache.needs_eviction() {
            match cache.evict_oldest() {
                Some((evict_id, evict_node, true)) => {
                    self.storage.write_page(evict_id, &evict_node)?;
                    self.stats.disk_writes.fetch_add(1, Ordering::Relaxed);
                }
                Some((_, _, false)) => {}
                None => break,
            }
        }

        cache.insert(page_id, node, dirty);
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn fetch(&self, page_id: PageId) -> SpatialResult<Node> {
        {
            let mut cache = self.cache.write();
            if let Some(node) = cache.get(page_id) {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(node.clone());
            }
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.stats.disk_reads.fetch_add(1, Ordering::Relaxed);

        let node = self.storage.read_page(page_id)?;
        self.cache_node(page_id, node.clone(), false)?;
        Ok(node)
    }

    fn allocate(&self) -> SpatialResult<PageId> {
        let mut header = self.header.write();
        if header.free_list_head != 0 {
            let page_id = header.free_list_head;
            let link = self.storage.read_free_page(page_id)?;
            header.free_list_head = link.next_free;
            return Ok(page_id);
        }

        let page_id = header.next_page_id;
        header.next_page_id += 1;
        Ok(page_id)
    }

    fn write(&self, page_id: PageId, node: &Node) -> SpatialResult<()> {
        // Dirty in cache; hits disk on eviction or sync
        self.cache_node(page_id, node.clone(), true)
    }

    fn free(&self, page_id: PageId) -> SpatialResult<()> {
        let _ = self.cache.write().remove(page_id);

        let mut header = self.header.write();
        let link = FreePage {
            next_free: header.free_list_head,
        };
        self.storage.write_free_page(page_id, &link)?;
        header.free_list_head = page_id;
        Ok(())
    }

    fn read_state(&self) -> SpatialResult<Option<TreeState>> {
        Ok(Some(self.header.read().state.clone()))
    }

    fn write_state(&self, state: &TreeState) -> SpatialResult<()> {
        self.header.write().state = state.clone();
        Ok(())
    }

    fn sync(&self) -> SpatialResult<()> {
        let dirty = self.cache.read().dirty_pages();
        for page_id in dirty {
            let mut cache = self.cache.write();
            if let Some(cached) = cache.peek(page_id) {
                if cached.dirty {
                    let node = cached.node.clone();
                    self.storage.write_page(page_id, &node)?;
                    self.stats.disk_writes.fetch_add(1, Ordering::Relaxed);
                    cache.mark_clean(page_id);
                }
            }
        }

        self.storage.write_header(&self.header.read())?;
        self.storage.sync()?;
        Ok(())
    }
}

impl Drop for FilePageStore {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = PageStore::sync(self);
    }
}
