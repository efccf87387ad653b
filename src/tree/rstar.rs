//! The R*-tree engine.
//!
//! Owns the root pointer, the page store handle and the dimensionality, and
//! implements the mutating algorithms: ChooseSubtree descent, R*-style
//! splits, forced reinsertion, bottom-up bulk loading, and deletion with
//! tree condensation. Query engines consume its read primitives
//! ([`RStarTree::fetch`], [`RStarTree::root_page`]).
//!
//! A mutation (insert/delete including cascading split/condense) must run to
//! completion without interleaving another mutation; mutating methods
//! therefore take `&mut self` and the facade serializes writers with a
//! single reader/writer lock over the whole index.

use std::collections::HashSet;

use crate::mbr::Mbr;

use super::store::PageStore;
use super::types::{
    DirectoryEntry, LeafEntry, Node, PageId, SpatialError, SpatialResult, TreeConfig, TreeState,
};

/// Outcome of a structural integrity sweep over the whole tree.
///
/// `violations` are fatal findings (loose MBRs, level mix-ups, overfull
/// nodes, bad counts). Under-filled non-root nodes are reported separately:
/// bulk loading may legitimately leave trailing nodes below the minimum
/// fill.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub pages_checked: u64,
    pub violations: Vec<String>,
    pub underfull_pages: Vec<PageId>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// An entry at some tree level: a point at level 0, a child reference above.
enum TreeEntry {
    Leaf(LeafEntry),
    Directory(DirectoryEntry),
}

impl TreeEntry {
    fn mbr(&self) -> Mbr {
        match self {
            TreeEntry::Leaf(e) => e.mbr(),
            TreeEntry::Directory(e) => e.mbr.clone(),
        }
    }
}

/// Items the split algorithm can order along an axis.
trait SplitItem: Clone {
    fn axis_min(&self, axis: usize) -> f64;
    fn axis_max(&self, axis: usize) -> f64;
    fn item_mbr(&self) -> Mbr;
    fn tie_id(&self) -> u64;
}

impl SplitItem for LeafEntry {
    fn axis_min(&self, axis: usize) -> f64 {
        self.point[axis]
    }
    fn axis_max(&self, axis: usize) -> f64 {
        self.point[axis]
    }
    fn item_mbr(&self) -> Mbr {
        self.mbr()
    }
    fn tie_id(&self) -> u64 {
        self.id
    }
}

impl SplitItem for DirectoryEntry {
    fn axis_min(&self, axis: usize) -> f64 {
        self.mbr.min[axis]
    }
    fn axis_max(&self, axis: usize) -> f64 {
        self.mbr.max[axis]
    }
    fn item_mbr(&self) -> Mbr {
        self.mbr.clone()
    }
    fn tie_id(&self) -> u64 {
        self.page_id
    }
}

/// A disk-paged R*-tree over a [`PageStore`].
pub struct RStarTree<S: PageStore> {
    store: S,
    state: TreeState,
    config: TreeConfig,
    closed: bool,
}

impl<S: PageStore> RStarTree<S> {
    /// Creates an empty tree of the given dimensionality in `store`.
    pub fn create(store: S, dims: usize, config: TreeConfig) -> SpatialResult<Self> {
        let state = TreeState::empty(dims);
        store.write_state(&state)?;
        log::debug!("created {}-dimensional tree (M={})", dims, config.max_entries);
        Ok(Self {
            store,
            state,
            config,
            closed: false,
        })
    }

    /// Resumes a tree from the state persisted in `store`.
    pub fn open(store: S, config: TreeConfig) -> SpatialResult<Self> {
        let state = store.read_state()?.ok_or_else(|| {
            SpatialError::Corrupted("store holds no index state to open".into())
        })?;
        log::debug!(
            "opened tree: {} entries, height {}",
            state.entry_count,
            state.height
        );
        Ok(Self {
            store,
            state,
            config,
            closed: false,
        })
    }

    pub fn dims(&self) -> usize {
        self.state.dims as usize
    }

    pub fn len(&self) -> u64 {
        self.state.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.state.entry_count == 0
    }

    pub fn height(&self) -> u32 {
        self.state.height
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub(crate) fn root_page(&self) -> PageId {
        self.state.root_page
    }

    /// Read primitive for the query engines.
    pub(crate) fn fetch(&self, page_id: PageId) -> SpatialResult<Node> {
        self.check_closed()?;
        self.store.fetch(page_id)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Inserts one leaf entry, splitting and reinserting as needed.
    pub fn insert(&mut self, entry: LeafEntry) -> SpatialResult<()> {
        self.check_closed()?;
        self.check_dims(&entry.point)?;

        // One forced-reinsertion attempt per level per top-level insertion
        let mut reinserted_levels = HashSet::new();
        self.insert_at_level(TreeEntry::Leaf(entry), 0, &mut reinserted_levels)?;
        self.state.entry_count += 1;
        self.persist_state()
    }

    fn insert_at_level(
        &mut self,
        entry: TreeEntry,
        level: u32,
        reinserted_levels: &mut HashSet<u32>,
    ) -> SpatialResult<()> {
        if self.state.root_page == 0 {
            let TreeEntry::Leaf(leaf) = entry else {
                return Err(SpatialError::Corrupted(
                    "directory entry inserted into an empty tree".into(),
                ));
            };
            let page = self.store.allocate()?;
            self.store.write(
                page,
                &Node::Leaf {
                    entries: vec![leaf],
                },
            )?;
            self.state.root_page = page;
            self.state.height = 1;
            return Ok(());
        }

        let mbr = entry.mbr();
        let path = self.choose_path(&mbr, level)?;
        let target = *path.last().expect("path always contains the root");
        let mut node = self.store.fetch(target)?;
        match entry {
            TreeEntry::Leaf(e) => node.push_leaf(e)?,
            TreeEntry::Directory(e) => node.push_directory(e)?,
        }
        self.finish_insert(path.len() - 1, node, &path, reinserted_levels)
    }

    /// Walks from the root to the node at `target_level` that needs the
    /// least enlargement for `mbr` (least overlap enlargement when choosing
    /// among leaves). Returns the page ids visited, root first.
    fn choose_path(&self, mbr: &Mbr, target_level: u32) -> SpatialResult<Vec<PageId>> {
        let mut path = vec![self.state.root_page];
        loop {
            let page = *path.last().expect("path is never empty");
            let node = self.store.fetch(page)?;
            if node.level() == target_level {
                return Ok(path);
            }
            if node.level() < target_level {
                return Err(SpatialError::Corrupted(
                    "insertion level above the root".into(),
                ));
            }
            let Node::Directory { entries, level } = node else {
                return Err(SpatialError::Corrupted(
                    "leaf encountered above the target level".into(),
                ));
            };
            let idx = self.choose_child_index(&entries, mbr, level, target_level)?;
            path.push(entries[idx].page_id);
        }
    }

    fn choose_child_index(
        &self,
        entries: &[DirectoryEntry],
        mbr: &Mbr,
        node_level: u32,
        target_level: u32,
    ) -> SpatialResult<usize> {
        if entries.is_empty() {
            return Err(SpatialError::Corrupted(
                "directory node with no children".into(),
            ));
        }

        // R* rule: overlap enlargement is decisive only directly above the
        // leaves; higher up, plain area enlargement is cheaper and adequate.
        if node_level == 1 && target_level == 0 {
            let mut best = 0usize;
            let mut best_key = (f64::INFINITY, f64::INFINITY, f64::INFINITY);
            for (i, candidate) in entries.iter().enumerate() {
                let enlarged = candidate.mbr.union(mbr);
                let mut overlap_enlargement = 0.0;
                for (j, other) in entries.iter().enumerate() {
                    if i != j {
                        overlap_enlargement +=
                            enlarged.overlap(&other.mbr) - candidate.mbr.overlap(&other.mbr);
                    }
                }
                let key = (
                    overlap_enlargement,
                    candidate.mbr.enlargement(mbr),
                    candidate.mbr.area(),
                );
                if lex3_less(key, best_key) {
                    best_key = key;
                    best = i;
                }
            }
            return Ok(best);
        }

        // Least area enlargement; ties by smaller resulting area
        let mut best_key = (f64::INFINITY, f64::INFINITY);
        for candidate in entries.iter() {
            let key = (
                candidate.mbr.enlargement(mbr),
                candidate.mbr.union(mbr).area(),
            );
            if lex2_less(key, best_key) {
                best_key = key;
            }
        }
        let tied: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| (e.mbr.enlargement(mbr), e.mbr.union(mbr).area()) == best_key)
            .map(|(i, _)| i)
            .collect();
        if tied.len() == 1 {
            return Ok(tied[0]);
        }

        // Final tie-break: smallest child fan-out keeps the tree balanced
        let mut best = tied[0];
        let mut best_len = usize::MAX;
        for &i in &tied {
            let len = self.store.fetch(entries[i].page_id)?.len();
            if len < best_len {
                best_len = len;
                best = i;
            }
        }
        Ok(best)
    }

    /// Completes an insertion into the in-memory `node` at `path[depth]`:
    /// writes it back when it fits, otherwise applies the overflow treatment
    /// (forced reinsertion once per level, else split) and propagates
    /// upward.
    fn finish_insert(
        &mut self,
        depth: usize,
        mut node: Node,
        path: &[PageId],
        reinserted_levels: &mut HashSet<u32>,
    ) -> SpatialResult<()> {
        let page = path[depth];

        if node.len() <= self.config.max_entries {
            self.store.write(page, &node)?;
            return self.adjust_upward(&path[..=depth]);
        }

        let level = node.level();

        if depth > 0 && self.config.reinsert_count > 0 && !reinserted_levels.contains(&level) {
            reinserted_levels.insert(level);
            log::trace!("forced reinsertion at level {level} (page {page})");
            let removed = self.take_farthest(&mut node, self.config.reinsert_count)?;
            self.store.write(page, &node)?;
            self.adjust_upward(&path[..=depth])?;
            for entry in removed {
                self.insert_at_level(entry, level, reinserted_levels)?;
            }
            return Ok(());
        }

        // Split
        log::trace!("splitting page {page} at level {level}");
        let (keep, sibling) = self.split_node(node)?;
        let keep_mbr = keep
            .compute_mbr()
            .ok_or_else(|| SpatialError::Corrupted("split produced an empty node".into()))?;
        let sibling_mbr = sibling
            .compute_mbr()
            .ok_or_else(|| SpatialError::Corrupted("split produced an empty node".into()))?;
        let sibling_page = self.store.allocate()?;
        self.store.write(page, &keep)?;
        self.store.write(sibling_page, &sibling)?;

        if depth == 0 {
            // Root split grows the tree by one level
            let new_root_page = self.store.allocate()?;
            let new_root = Node::Directory {
                entries: vec![
                    DirectoryEntry {
                        page_id: page,
                        mbr: keep_mbr,
                    },
                    DirectoryEntry {
                        page_id: sibling_page,
                        mbr: sibling_mbr,
                    },
                ],
                level: level + 1,
            };
            self.store.write(new_root_page, &new_root)?;
            self.state.root_page = new_root_page;
            self.state.height += 1;
            return Ok(());
        }

        let parent_page = path[depth - 1];
        let mut parent = self.store.fetch(parent_page)?;
        parent.update_child_mbr(page, keep_mbr)?;
        parent.push_directory(DirectoryEntry {
            page_id: sibling_page,
            mbr: sibling_mbr,
        })?;
        self.finish_insert(depth - 1, parent, path, reinserted_levels)
    }

    /// Restores the MBR invariant along `path` (deepest node last), walking
    /// bottom-up and tightening each parent's reference to its child.
    fn adjust_upward(&self, path: &[PageId]) -> SpatialResult<()> {
        for i in (1..path.len()).rev() {
            let child_page = path[i];
            let parent_page = path[i - 1];
            let child_mbr = self
                .store
                .fetch(child_page)?
                .compute_mbr()
                .ok_or_else(|| SpatialError::Corrupted("empty node on insertion path".into()))?;
            let mut parent = self.store.fetch(parent_page)?;
            parent.update_child_mbr(child_page, child_mbr)?;
            self.store.write(parent_page, &parent)?;
        }
        Ok(())
    }

    /// Removes the `count` entries whose centers lie farthest from the node
    /// MBR's center, for reinsertion from the top.
    fn take_farthest(&self, node: &mut Node, count: usize) -> SpatialResult<Vec<TreeEntry>> {
        let center = node
            .compute_mbr()
            .ok_or_else(|| SpatialError::Corrupted("overflowing node is empty".into()))?
            .center();

        match node {
            Node::Leaf { entries } => {
                entries.sort_by(|a, b| {
                    dist_sq(&a.point, &center)
                        .total_cmp(&dist_sq(&b.point, &center))
                        .then(a.id.cmp(&b.id))
                });
                let removed = entries.split_off(entries.len() - count);
                Ok(removed.into_iter().map(TreeEntry::Leaf).collect())
            }
            Node::Directory { entries, .. } => {
                entries.sort_by(|a, b| {
                    dist_sq(&a.mbr.center(), &center)
                        .total_cmp(&dist_sq(&b.mbr.center(), &center))
                        .then(a.page_id.cmp(&b.page_id))
                });
                let removed = entries.split_off(entries.len() - count);
                Ok(removed.into_iter().map(TreeEntry::Directory).collect())
            }
        }
    }

    fn split_node(&self, node: Node) -> SpatialResult<(Node, Node)> {
        match node {
            Node::Leaf { entries } => {
                let (left, right) = self.best_split(entries)?;
                Ok((Node::Leaf { entries: left }, Node::Leaf { entries: right }))
            }
            Node::Directory { entries, level } => {
                let (left, right) = self.best_split(entries)?;
                Ok((
                    Node::Directory {
                        entries: left,
                        level,
                    },
                    Node::Directory {
                        entries: right,
                        level,
                    },
                ))
            }
        }
    }

    /// Partitions an overflowing entry set in two, each side holding at
    /// least `m` entries. Entries are sorted along every axis by lower and
    /// by upper coordinate; among all valid distributions the one with the
    /// least total margin wins, ties by least overlap, then least total
    /// area.
    fn best_split<E: SplitItem>(&self, entries: Vec<E>) -> SpatialResult<(Vec<E>, Vec<E>)> {
        let total = entries.len();
        let m = self.config.min_entries.min(total / 2).max(1);
        let dims = self.dims();

        let mut best: Option<(f64, f64, f64, Vec<E>, usize)> = None;

        for axis in 0..dims {
            for sort_by_upper in [false, true] {
                let mut sorted = entries.clone();
                sorted.sort_by(|a, b| {
                    let (ka, kb) = if sort_by_upper {
                        (a.axis_max(axis), b.axis_max(axis))
                    } else {
                        (a.axis_min(axis), b.axis_min(axis))
                    };
                    ka.total_cmp(&kb).then(a.tie_id().cmp(&b.tie_id()))
                });

                // Prefix/suffix bounds make each distribution O(1)
                let mut prefix: Vec<Mbr> = Vec::with_capacity(total);
                for item in &sorted {
                    let mbr = match prefix.last() {
                        Some(prev) => prev.union(&item.item_mbr()),
                        None => item.item_mbr(),
                    };
                    prefix.push(mbr);
                }
                let mut suffix: Vec<Mbr> = vec![sorted[total - 1].item_mbr(); total];
                for i in (0..total - 1).rev() {
                    suffix[i] = suffix[i + 1].union(&sorted[i].item_mbr());
                }

                for k in m..=(total - m) {
                    let left = &prefix[k - 1];
                    let right = &suffix[k];
                    let margin = left.margin() + right.margin();
                    let overlap = left.overlap(right);
                    let area = left.area() + right.area();

                    let better = match &best {
                        None => true,
                        Some((bm, bo, ba, _, _)) => lex3_less((margin, overlap, area), (*bm, *bo, *ba)),
                    };
                    if better {
                        best = Some((margin, overlap, area, sorted.clone(), k));
                    }
                }
            }
        }

        let (_, _, _, mut sorted, k) = best.ok_or_else(|| {
            SpatialError::Corrupted("split attempted on a node too small to split".into())
        })?;
        let right = sorted.split_off(k);
        Ok((sorted, right))
    }

    // ------------------------------------------------------------------
    // Bulk load
    // ------------------------------------------------------------------

    /// Builds the tree bottom-up from `entries` using recursive sort-tile
    /// partitioning, packing nodes to the configured bulk fill factor.
    ///
    /// Deterministic for identical input order and fill factor. Requires an
    /// empty tree; on a non-empty tree entries are inserted one at a time
    /// instead.
    pub fn bulk_load(&mut self, entries: Vec<LeafEntry>) -> SpatialResult<()> {
        self.check_closed()?;
        for entry in &entries {
            self.check_dims(&entry.point)?;
        }

        if !self.is_empty() {
            log::debug!("bulk load on a populated tree; falling back to incremental insertion");
            for entry in entries {
                self.insert(entry)?;
            }
            return Ok(());
        }
        if entries.is_empty() {
            return Ok(());
        }

        let count = entries.len() as u64;
        let dims = self.dims();
        let node_capacity = ((self.config.max_entries as f64 * self.config.bulk_fill) as usize)
            .clamp(1, self.config.max_entries);
        log::debug!("bulk loading {count} entries ({node_capacity} per node)");

        // Pack leaves
        let mut current: Vec<DirectoryEntry> = Vec::new();
        for tile in str_partition(entries, 0, dims, node_capacity) {
            let node = Node::Leaf { entries: tile };
            let mbr = node
                .compute_mbr()
                .ok_or_else(|| SpatialError::Corrupted("bulk load produced an empty tile".into()))?;
            let page_id = self.store.allocate()?;
            self.store.write(page_id, &node)?;
            current.push(DirectoryEntry { page_id, mbr });
        }

        // Pack directory levels until a single root remains
        let mut level = 1u32;
        while current.len() > 1 {
            let mut next: Vec<DirectoryEntry> = Vec::new();
            for tile in str_partition(current, 0, dims, node_capacity) {
                let node = Node::Directory {
                    entries: tile,
                    level,
                };
                let mbr = node.compute_mbr().ok_or_else(|| {
                    SpatialError::Corrupted("bulk load produced an empty tile".into())
                })?;
                let page_id = self.store.allocate()?;
                self.store.write(page_id, &node)?;
                next.push(DirectoryEntry { page_id, mbr });
            }
            current = next;
            level += 1;
        }

        self.state.root_page = current[0].page_id;
        self.state.height = level;
        self.state.entry_count = count;
        self.persist_state()
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Removes the entry for `id` located at `point`. Returns whether an
    /// entry was found and removed; the tree is fully condensed (all MBRs
    /// tight) before this returns.
    pub fn remove(&mut self, point: &[f64], id: u64) -> SpatialResult<bool> {
        self.check_closed()?;
        self.check_dims(point)?;

        if self.state.root_page == 0 {
            return Ok(false);
        }
        let Some(path) = self.find_path_to_object(point, id)? else {
            return Ok(false);
        };
        self.delete_path(&path, id)?;
        self.persist_state()?;
        Ok(true)
    }

    /// Depth-first search for the leaf holding `id`, pruned by MBR
    /// containment of `point`. Leaf candidates match by identifier equality;
    /// coordinates alone are not sufficient when duplicate points exist.
    fn find_path_to_object(
        &self,
        point: &[f64],
        id: u64,
    ) -> SpatialResult<Option<Vec<PageId>>> {
        let mut path = Vec::new();
        if self.descend_to_object(self.state.root_page, point, id, &mut path)? {
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    fn descend_to_object(
        &self,
        page: PageId,
        point: &[f64],
        id: u64,
        path: &mut Vec<PageId>,
    ) -> SpatialResult<bool> {
        path.push(page);
        let node = self.store.fetch(page)?;
        match node {
            Node::Leaf { entries } => {
                if entries.iter().any(|e| e.id == id) {
                    return Ok(true);
                }
            }
            Node::Directory { entries, .. } => {
                for entry in &entries {
                    if entry.mbr.contains_point(point)
                        && self.descend_to_object(entry.page_id, point, id, path)?
                    {
                        return Ok(true);
                    }
                }
            }
        }
        path.pop();
        Ok(false)
    }

    /// Removes the leaf entry at the end of `path`, then condenses: nodes
    /// dropping below the minimum fill are removed bottom-up and their leaf
    /// entries reinserted through the normal insertion path.
    fn delete_path(&mut self, path: &[PageId], id: u64) -> SpatialResult<()> {
        let leaf_page = *path
            .last()
            .ok_or_else(|| SpatialError::Corrupted("empty deletion path".into()))?;
        let mut current = self.store.fetch(leaf_page)?;
        {
            let Node::Leaf { entries } = &mut current else {
                return Err(SpatialError::Corrupted(
                    "deletion path does not end at a leaf".into(),
                ));
            };
            let pos = entries.iter().position(|e| e.id == id).ok_or_else(|| {
                SpatialError::Corrupted("object vanished from leaf during deletion".into())
            })?;
            entries.remove(pos);
        }
        self.state.entry_count -= 1;

        let mut orphans: Vec<LeafEntry> = Vec::new();
        let mut depth = path.len() - 1;
        loop {
            let page = path[depth];
            if depth == 0 {
                // The root is exempt from the minimum fill
                self.store.write(page, &current)?;
                break;
            }
            if current.len() < self.config.min_entries {
                log::trace!("condense drops underfull page {page}");
                self.harvest_leaf_entries(&current, &mut orphans)?;
                let parent_page = path[depth - 1];
                let mut parent = self.store.fetch(parent_page)?;
                parent.remove_child(page)?;
                self.store.free(page)?;
                current = parent;
                depth -= 1;
            } else {
                self.store.write(page, &current)?;
                self.adjust_upward(&path[..=depth])?;
                break;
            }
        }

        self.shrink_root()?;

        for entry in orphans {
            let mut reinserted_levels = HashSet::new();
            self.insert_at_level(TreeEntry::Leaf(entry), 0, &mut reinserted_levels)?;
        }
        Ok(())
    }

    /// Collects all leaf entries reachable from `node`, freeing the pages of
    /// every visited child (the node's own page is the caller's to free).
    fn harvest_leaf_entries(
        &mut self,
        node: &Node,
        out: &mut Vec<LeafEntry>,
    ) -> SpatialResult<()> {
        match node {
            Node::Leaf { entries } => {
                out.extend(entries.iter().cloned());
            }
            Node::Directory { entries, .. } => {
                for entry in entries {
                    let child = self.store.fetch(entry.page_id)?;
                    self.harvest_leaf_entries(&child, out)?;
                    self.store.free(entry.page_id)?;
                }
            }
        }
        Ok(())
    }

    /// Collapses degenerate roots: a directory root with a single child is
    /// replaced by that child (height shrinks), an emptied root leaf resets
    /// the tree to empty.
    fn shrink_root(&mut self) -> SpatialResult<()> {
        loop {
            if self.state.root_page == 0 {
                return Ok(());
            }
            let root = self.store.fetch(self.state.root_page)?;
            match root {
                Node::Directory { ref entries, .. } if entries.len() == 1 => {
                    let old = self.state.root_page;
                    self.state.root_page = entries[0].page_id;
                    self.state.height -= 1;
                    self.store.free(old)?;
                }
                Node::Directory { ref entries, .. } if entries.is_empty() => {
                    let old = self.state.root_page;
                    self.state.root_page = 0;
                    self.state.height = 0;
                    self.store.free(old)?;
                    return Ok(());
                }
                Node::Leaf { ref entries } if entries.is_empty() => {
                    let old = self.state.root_page;
                    self.state.root_page = 0;
                    self.state.height = 0;
                    self.store.free(old)?;
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Removes all entries and resets the tree to its initial empty state.
    pub fn clear(&mut self) -> SpatialResult<()> {
        self.check_closed()?;
        if self.state.root_page != 0 {
            self.free_subtree(self.state.root_page)?;
        }
        self.state = TreeState::empty(self.dims());
        log::debug!("cleared tree");
        self.persist_state()
    }

    fn free_subtree(&mut self, page: PageId) -> SpatialResult<()> {
        let node = self.store.fetch(page)?;
        if let Node::Directory { entries, .. } = node {
            for entry in entries {
                self.free_subtree(entry.page_id)?;
            }
        }
        self.store.free(page)
    }

    /// Recomputes all bounds bottom-up and verifies the structural
    /// invariants: tight MBRs, consistent levels, capacity, and entry
    /// count. Expensive; intended for tests and explicit maintenance.
    pub fn check_integrity(&self) -> SpatialResult<IntegrityReport> {
        self.check_closed()?;
        let mut report = IntegrityReport::default();

        if self.state.root_page == 0 {
            if self.state.entry_count != 0 || self.state.height != 0 {
                report
                    .violations
                    .push("empty tree with nonzero count or height".into());
            }
            return Ok(report);
        }

        let root = self.store.fetch(self.state.root_page)?;
        if root.level() + 1 != self.state.height {
            report.violations.push(format!(
                "root level {} inconsistent with height {}",
                root.level(),
                self.state.height
            ));
        }

        let mut leaf_count = 0u64;
        self.verify_subtree(self.state.root_page, true, &mut leaf_count, &mut report)?;

        if leaf_count != self.state.entry_count {
            report.violations.push(format!(
                "entry count {} != indexed leaf entries {}",
                self.state.entry_count, leaf_count
            ));
        }
        Ok(report)
    }

    fn verify_subtree(
        &self,
        page: PageId,
        is_root: bool,
        leaf_count: &mut u64,
        report: &mut IntegrityReport,
    ) -> SpatialResult<Option<Mbr>> {
        let node = self.store.fetch(page)?;
        report.pages_checked += 1;

        if node.len() > self.config.max_entries {
            report
                .violations
                .push(format!("page {page} holds more than M entries"));
        }
        if !is_root && node.len() < self.config.min_entries {
            report.underfull_pages.push(page);
        }
        if node.is_empty() {
            report.violations.push(format!("page {page} is empty"));
            return Ok(None);
        }

        match &node {
            Node::Leaf { entries } => {
                *leaf_count += entries.len() as u64;
                for e in entries {
                    if e.point.len() != self.dims() {
                        report
                            .violations
                            .push(format!("object {} has wrong dimensionality", e.id));
                    }
                }
            }
            Node::Directory { entries, level } => {
                for entry in entries {
                    let child = self.store.fetch(entry.page_id)?;
                    if child.level() + 1 != *level {
                        report.violations.push(format!(
                            "page {} at level {} has child {} at level {}",
                            page,
                            level,
                            entry.page_id,
                            child.level()
                        ));
                    }
                    let child_mbr =
                        self.verify_subtree(entry.page_id, false, leaf_count, report)?;
                    match child_mbr {
                        Some(ref tight) if *tight != entry.mbr => {
                            report.violations.push(format!(
                                "page {} holds a loose bound for child {}",
                                page, entry.page_id
                            ));
                        }
                        None => {
                            report
                                .violations
                                .push(format!("child {} has no bound", entry.page_id));
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(node.compute_mbr())
    }

    /// Writes the index state and flushes the store.
    pub fn flush(&self) -> SpatialResult<()> {
        self.check_closed()?;
        self.store.write_state(&self.state)?;
        self.store.sync()
    }

    /// Flushes and marks the tree closed; subsequent operations fail.
    pub fn close(&mut self) -> SpatialResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    fn persist_state(&self) -> SpatialResult<()> {
        self.store.write_state(&self.state)
    }

    fn check_closed(&self) -> SpatialResult<()> {
        if self.closed {
            Err(SpatialError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_dims(&self, point: &[f64]) -> SpatialResult<()> {
        if point.len() != self.dims() {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dims(),
                actual: point.len(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn dist_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn lex2_less(a: (f64, f64), b: (f64, f64)) -> bool {
    match a.0.total_cmp(&b.0) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a.1.total_cmp(&b.1).is_lt(),
    }
}

fn lex3_less(a: (f64, f64, f64), b: (f64, f64, f64)) -> bool {
    match a.0.total_cmp(&b.0) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => lex2_less((a.1, a.2), (b.1, b.2)),
    }
}

/// Recursive sort-tile partitioning: sorts by the center coordinate of one
/// axis, slices into even slabs, and recurses on the remaining axes until
/// tiles hold at most `capacity` items.
fn str_partition<E: SplitItem>(
    items: Vec<E>,
    axis: usize,
    dims: usize,
    capacity: usize,
) -> Vec<Vec<E>> {
    if items.len() <= capacity {
        return vec![items];
    }

    let mut items = items;
    items.sort_by(|a, b| {
        let ca = (a.axis_min(axis) + a.axis_max(axis)) / 2.0;
        let cb = (b.axis_min(axis) + b.axis_max(axis)) / 2.0;
        ca.total_cmp(&cb).then(a.tie_id().cmp(&b.tie_id()))
    });

    if axis + 1 == dims {
        return chunk_evenly(items, capacity);
    }

    // Slab count so that each remaining axis shares the tiling evenly
    let tiles = (items.len() + capacity - 1) / capacity;
    let remaining = (dims - axis) as f64;
    let slabs = (tiles as f64).powf(1.0 / remaining).ceil() as usize;
    let slab_capacity = (items.len() + slabs - 1) / slabs.max(1);

    let mut result = Vec::new();
    for slab in chunk_evenly(items, slab_capacity) {
        result.extend(str_partition(slab, axis + 1, dims, capacity));
    }
    result
}

/// Splits `items` into groups of at most `capacity`, sizes differing by at
/// most one so no trailing sliver group appears.
fn chunk_evenly<E>(items: Vec<E>, capacity: usize) -> Vec<Vec<E>> {
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let groups = (total + capacity - 1) / capacity;
    let base = total / groups;
    let extra = total % groups;

    let mut result = Vec::with_capacity(groups);
    let mut iter = items.into_iter();
    for g in 0..groups {
        let size = base + usize::from(g < extra);
        result.push(iter.by_ref().take(size).collect());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::store::MemoryPageStore;

    fn tree(max_entries: usize) -> RStarTree<MemoryPageStore> {
        RStarTree::create(
            MemoryPageStore::new(),
            2,
            TreeConfig::new(max_entries),
        )
        .unwrap()
    }

    fn grid_points(n: usize) -> Vec<LeafEntry> {
        (0..n)
            .map(|i| LeafEntry::new(i as u64, vec![(i % 10) as f64, (i / 10) as f64]))
            .collect()
    }

    #[test]
    fn test_insert_into_empty_tree() {
        let mut t = tree(4);
        t.insert(LeafEntry::new(1, vec![1.0, 2.0])).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.height(), 1);
        assert!(t.check_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_insert_splits_grow_height() {
        let mut t = tree(4);
        for entry in grid_points(100) {
            t.insert(entry).unwrap();
        }
        assert_eq!(t.len(), 100);
        assert!(t.height() >= 3, "M=4 with 100 entries must be deep");

        let report = t.check_integrity().unwrap();
        assert!(report.is_valid(), "violations: {:?}", report.violations);
    }

    #[test]
    fn test_insert_wrong_dims_rejected() {
        let mut t = tree(4);
        let err = t.insert(LeafEntry::new(1, vec![1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, SpatialError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_reinsertion_disabled_still_valid() {
        let mut t = RStarTree::create(
            MemoryPageStore::new(),
            2,
            TreeConfig::new(4).with_reinsert_count(0),
        )
        .unwrap();
        for entry in grid_points(60) {
            t.insert(entry).unwrap();
        }
        assert_eq!(t.len(), 60);
        assert!(t.check_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_remove_and_condense_to_empty() {
        let mut t = tree(4);
        for entry in grid_points(50) {
            t.insert(entry).unwrap();
        }
        for entry in grid_points(50) {
            assert!(t.remove(&entry.point, entry.id).unwrap());
            let report = t.check_integrity().unwrap();
            assert!(report.is_valid(), "violations: {:?}", report.violations);
        }
        assert_eq!(t.len(), 0);
        assert_eq!(t.height(), 0, "height must return to its initial value");
        assert!(t.is_empty());
    }

    #[test]
    fn test_remove_missing_returns_false() {
        let mut t = tree(4);
        t.insert(LeafEntry::new(1, vec![0.0, 0.0])).unwrap();
        assert!(!t.remove(&[5.0, 5.0], 99).unwrap());
        assert!(!t.remove(&[0.0, 0.0], 2).unwrap());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_remove_duplicate_points_by_id() {
        let mut t = tree(4);
        t.insert(LeafEntry::new(1, vec![3.0, 3.0])).unwrap();
        t.insert(LeafEntry::new(2, vec![3.0, 3.0])).unwrap();

        assert!(t.remove(&[3.0, 3.0], 2).unwrap());
        assert_eq!(t.len(), 1);
        // The other object at the same coordinates must survive
        assert!(t.remove(&[3.0, 3.0], 1).unwrap());
        assert!(t.is_empty());
    }

    #[test]
    fn test_bulk_load_structure() {
        let mut t = tree(8);
        t.bulk_load(grid_points(200)).unwrap();
        assert_eq!(t.len(), 200);
        assert!(t.height() >= 2);

        let report = t.check_integrity().unwrap();
        assert!(report.is_valid(), "violations: {:?}", report.violations);
    }

    #[test]
    fn test_bulk_load_empty_and_single() {
        let mut t = tree(8);
        t.bulk_load(Vec::new()).unwrap();
        assert!(t.is_empty());

        t.bulk_load(vec![LeafEntry::new(9, vec![1.0, 1.0])]).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.height(), 1);
    }

    #[test]
    fn test_bulk_load_then_remove() {
        let mut t = tree(8);
        t.bulk_load(grid_points(120)).unwrap();
        for entry in grid_points(120) {
            assert!(t.remove(&entry.point, entry.id).unwrap());
        }
        assert!(t.is_empty());
        assert_eq!(t.height(), 0);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut t = tree(4);
        for entry in grid_points(30) {
            t.insert(entry).unwrap();
        }
        t.clear().unwrap();
        assert!(t.is_empty());
        assert_eq!(t.height(), 0);
        assert!(t.check_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_closed_tree_rejects_operations() {
        let mut t = tree(4);
        t.insert(LeafEntry::new(1, vec![0.0, 0.0])).unwrap();
        t.close().unwrap();

        assert!(matches!(
            t.insert(LeafEntry::new(2, vec![1.0, 1.0])),
            Err(SpatialError::Closed)
        ));
        assert!(matches!(t.remove(&[0.0, 0.0], 1), Err(SpatialError::Closed)));
    }

    #[test]
    fn test_reopen_from_store_state() {
        let store = MemoryPageStore::new();
        let mut t = RStarTree::create(store, 2, TreeConfig::new(4)).unwrap();
        for entry in grid_points(25) {
            t.insert(entry).unwrap();
        }
        let height = t.height();
        t.flush().unwrap();

        // Rebuild the handle from the same store
        let RStarTree { store, .. } = t;
        let reopened = RStarTree::open(store, TreeConfig::new(4)).unwrap();
        assert_eq!(reopened.len(), 25);
        assert_eq!(reopened.height(), height);
        assert!(reopened.check_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_chunk_evenly_no_sliver() {
        let chunks = chunk_evenly((0..49).map(|i| LeafEntry::new(i, vec![0.0, 0.0])).collect::<Vec<_>>(), 10);
        assert_eq!(chunks.len(), 5);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 49);
        assert!(sizes.iter().all(|&s| s == 9 || s == 10));
    }
}
