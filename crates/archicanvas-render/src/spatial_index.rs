#![forbid(unsafe_code)]

//! Spatial index over diagram items with amortized, chunked rebuilds.
//!
//! Answers "which items intersect this rectangle" for thousands of diagram
//! components and connections without scanning all of them.
//!
//! # Design
//!
//! Uses a hybrid approach:
//! - **Packed tree**: a bounding-volume tree bulk-loaded with sort-tile-recursive
//!   packing (fan-out 8 by default). Built in one pass, never edited in place.
//! - **Overflow set**: items inserted or moved since the last build live in a
//!   small side set that queries scan linearly.
//! - **Versions**: every mutation stamps the item with a fresh version. Tree
//!   leaves remember the version they were built from; a leaf whose version no
//!   longer matches is skipped, so a moved item is never reported twice.
//! - **Amortized rebuild**: after `rebuild_threshold` mutations a new tree is
//!   built in chunks of `rebuild_batch_size` items, one chunk per [`tick`].
//!
//! # Invariants
//!
//! 1. A live item is reported by a query either from the tree or from the
//!    overflow set, never both.
//! 2. `update` with identical bounds does not bump the version or the dirty
//!    counter.
//! 3. A chunk belonging to a superseded rebuild generation does nothing.
//!
//! # Failure Modes
//!
//! - If [`SpatialIndex::validate`] fails (bookkeeping out of sync), queries
//!   fall back to a linear scan over every slot and the fallback is counted.
//!   The next completed rebuild recounts and repairs the bookkeeping.
//!
//! [`tick`]: SpatialIndex::tick

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use archicanvas_core::geometry::{AxisAlignedBox, Point};
use smallvec::SmallVec;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the spatial index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialIndexConfig {
    /// Mutations since the last build before a rebuild is scheduled (default: 50).
    pub rebuild_threshold: usize,
    /// Items staged per rebuild chunk (default: 50).
    pub rebuild_batch_size: usize,
    /// Maximum children per tree node (default: 8, minimum 2).
    pub node_capacity: usize,
}

impl Default for SpatialIndexConfig {
    fn default() -> Self {
        Self {
            rebuild_threshold: 50,
            rebuild_batch_size: 50,
            node_capacity: 8,
        }
    }
}

impl SpatialIndexConfig {
    /// Set the mutation count that triggers a rebuild.
    #[must_use]
    pub fn with_rebuild_threshold(mut self, threshold: usize) -> Self {
        self.rebuild_threshold = threshold;
        self
    }

    /// Set the number of items staged per rebuild chunk.
    #[must_use]
    pub fn with_rebuild_batch_size(mut self, batch: usize) -> Self {
        self.rebuild_batch_size = batch;
        self
    }

    /// Set the maximum fan-out of tree nodes.
    #[must_use]
    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        self.node_capacity = capacity;
        self
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// What a spatial item represents on the canvas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// A diagram component (node).
    Component,
    /// A connection (edge) between two components, by component id.
    Connection {
        /// Source component id.
        source: String,
        /// Target component id.
        target: String,
    },
}

impl ItemKind {
    /// Stable string name, matching the canvas item kinds.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Connection { .. } => "connection",
        }
    }
}

/// An entry in the spatial index.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialItem {
    /// Unique id within the index.
    pub id: String,
    /// World-space bounds.
    pub bounds: AxisAlignedBox,
    /// Component or connection.
    pub kind: ItemKind,
    /// Opaque handle owned by the caller (e.g. an index into its own store).
    pub payload: u64,
}

impl SpatialItem {
    /// A component item.
    pub fn component(id: impl Into<String>, bounds: AxisAlignedBox) -> Self {
        Self {
            id: id.into(),
            bounds,
            kind: ItemKind::Component,
            payload: 0,
        }
    }

    /// A connection item between two component ids.
    pub fn connection(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        bounds: AxisAlignedBox,
    ) -> Self {
        Self {
            id: id.into(),
            bounds,
            kind: ItemKind::Connection {
                source: source.into(),
                target: target.into(),
            },
            payload: 0,
        }
    }

    /// Attach an opaque payload handle.
    #[must_use]
    pub fn with_payload(mut self, payload: u64) -> Self {
        self.payload = payload;
        self
    }

    /// Whether this item is a component.
    #[inline]
    pub fn is_component(&self) -> bool {
        matches!(self.kind, ItemKind::Component)
    }

    /// Whether this item is a connection.
    #[inline]
    pub fn is_connection(&self) -> bool {
        matches!(self.kind, ItemKind::Connection { .. })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by index mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialIndexError {
    /// An item with this id is already indexed.
    DuplicateId(String),
    /// No item with this id is indexed.
    NotFound(String),
    /// Bounds were non-finite or had negative extent.
    InvalidBounds {
        /// Offending item id.
        id: String,
        /// Rejected bounds.
        bounds: AxisAlignedBox,
    },
}

impl fmt::Display for SpatialIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "spatial item '{id}' is already indexed"),
            Self::NotFound(id) => write!(f, "spatial item '{id}' is not indexed"),
            Self::InvalidBounds { id, bounds } => write!(
                f,
                "spatial item '{id}' has invalid bounds ({}, {}, {}, {})",
                bounds.x, bounds.y, bounds.width, bounds.height
            ),
        }
    }
}

impl std::error::Error for SpatialIndexError {}

/// Bookkeeping inconsistency found by [`SpatialIndex::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCorruption {
    /// Live counter disagrees with the id map.
    LiveCountMismatch {
        /// Value of the live counter.
        live: usize,
        /// Number of ids in the id map.
        ids: usize,
    },
    /// More overflow entries than live items.
    OverflowExceedsLive {
        /// Overflow set size.
        overflow: usize,
        /// Value of the live counter.
        live: usize,
    },
    /// Tree references a node that does not exist.
    DanglingRoot,
}

impl fmt::Display for IndexCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LiveCountMismatch { live, ids } => {
                write!(f, "live count {live} does not match {ids} indexed ids")
            }
            Self::OverflowExceedsLive { overflow, live } => {
                write!(f, "overflow set of {overflow} exceeds {live} live items")
            }
            Self::DanglingRoot => write!(f, "tree root points past the node arena"),
        }
    }
}

impl std::error::Error for IndexCorruption {}

// ---------------------------------------------------------------------------
// Packed tree
// ---------------------------------------------------------------------------

/// A leaf reference to a slot, stamped with the version it was built from.
#[derive(Debug, Clone, Copy)]
struct LeafEntry {
    slot: u32,
    version: u64,
    bounds: AxisAlignedBox,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(SmallVec<[LeafEntry; 8]>),
    Branch(SmallVec<[u32; 8]>),
}

#[derive(Debug, Clone)]
struct Node {
    bounds: AxisAlignedBox,
    kind: NodeKind,
}

/// Immutable bulk-loaded tree.
#[derive(Debug, Clone, Default)]
struct PackedTree {
    nodes: Vec<Node>,
    root: Option<u32>,
    height: usize,
    entry_count: usize,
}

impl PackedTree {
    fn bulk_load(entries: Vec<LeafEntry>, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut tree = PackedTree {
            entry_count: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return tree;
        }

        let mut level: Vec<u32> = Vec::new();
        for group in str_pack(entries, capacity, |e| e.bounds.center()) {
            let bounds = group
                .iter()
                .map(|e| e.bounds)
                .reduce(|acc, b| acc.union(&b))
                .unwrap_or_default();
            level.push(tree.push(Node {
                bounds,
                kind: NodeKind::Leaf(SmallVec::from_vec(group)),
            }));
        }
        tree.height = 1;

        while level.len() > 1 {
            let groups = str_pack(level, capacity, |&idx| tree.nodes[idx as usize].bounds.center());
            let mut next = Vec::with_capacity(groups.len());
            for group in groups {
                let bounds = group
                    .iter()
                    .map(|&idx| tree.nodes[idx as usize].bounds)
                    .reduce(|acc, b| acc.union(&b))
                    .unwrap_or_default();
                next.push(tree.push(Node {
                    bounds,
                    kind: NodeKind::Branch(SmallVec::from_vec(group)),
                }));
            }
            level = next;
            tree.height += 1;
        }

        tree.root = level.first().copied();
        tree
    }

    fn push(&mut self, node: Node) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(node);
        idx
    }

    /// Visit every leaf entry whose bounds intersect `rect`.
    fn visit<F: FnMut(&LeafEntry)>(&self, rect: &AxisAlignedBox, mut f: F) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
        stack.push(root);
        while let Some(idx) = stack.pop() {
            let Some(node) = self.nodes.get(idx as usize) else {
                continue;
            };
            if !node.bounds.intersects(rect) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(entries) => {
                    for entry in entries {
                        if entry.bounds.intersects(rect) {
                            f(entry);
                        }
                    }
                }
                NodeKind::Branch(children) => stack.extend(children.iter().copied()),
            }
        }
    }
}

/// Sort-tile-recursive packing: split into vertical slices by center x, then
/// cut each slice into runs of `capacity` by center y.
fn str_pack<T, F>(mut items: Vec<T>, capacity: usize, center: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> Point,
{
    let group_count = items.len().div_ceil(capacity);
    let slices = (group_count as f64).sqrt().ceil().max(1.0) as usize;
    let slice_len = slices * capacity;

    items.sort_by(|a, b| center(a).x.total_cmp(&center(b).x));

    let mut groups = Vec::with_capacity(group_count);
    let mut rest = items;
    while !rest.is_empty() {
        let tail = rest.split_off(slice_len.min(rest.len()));
        let mut slice = rest;
        slice.sort_by(|a, b| center(a).y.total_cmp(&center(b).y));
        while !slice.is_empty() {
            let slice_tail = slice.split_off(capacity.min(slice.len()));
            groups.push(slice);
            slice = slice_tail;
        }
        rest = tail;
    }
    groups
}

// ---------------------------------------------------------------------------
// Chunked rebuild
// ---------------------------------------------------------------------------

/// Handle for one chunked rebuild run.
///
/// A ticket from an older generation is stale: running its chunks is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildTicket {
    generation: u64,
}

impl RebuildTicket {
    /// Generation this ticket belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of running one rebuild chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildProgress {
    /// No rebuild is pending.
    Idle,
    /// The ticket belongs to a superseded generation; nothing was done.
    Superseded,
    /// A chunk was staged; more remain.
    InProgress {
        /// Slots processed so far.
        processed: usize,
        /// Slots in this run.
        total: usize,
    },
    /// The new tree was swapped in.
    Completed {
        /// Items stored in the new tree.
        items: usize,
    },
}

#[derive(Debug)]
struct PendingRebuild {
    generation: u64,
    order: Vec<u32>,
    cursor: usize,
    staged: Vec<LeafEntry>,
    mutations_at_start: u64,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Diagnostic statistics for the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpatialIndexStats {
    /// Number of live items.
    pub item_count: usize,
    /// Height of the packed tree (0 when empty).
    pub height: usize,
    /// Entries stored in the packed tree at its last build.
    pub tree_entries: usize,
    /// Items waiting outside the tree.
    pub overflow_len: usize,
    /// Mutations since the last completed build.
    pub dirty_updates: usize,
    /// Completed rebuilds.
    pub rebuilds: u64,
    /// Queries answered by the linear fallback.
    pub fallback_scans: u64,
    /// Current rebuild generation.
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Slot {
    item: SpatialItem,
    version: u64,
    tree_version: Option<u64>,
}

impl Slot {
    #[inline]
    fn in_tree(&self) -> bool {
        self.tree_version == Some(self.version)
    }
}

/// Spatial index over canvas items.
#[derive(Debug)]
pub struct SpatialIndex {
    config: SpatialIndexConfig,
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    id_to_slot: HashMap<String, u32>,
    live: usize,
    tree: PackedTree,
    overflow: BTreeSet<u32>,
    next_version: u64,
    mutations: u64,
    dirty_updates: usize,
    generation: u64,
    pending: Option<PendingRebuild>,
    rebuilds: u64,
    fallback_scans: Cell<u64>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(SpatialIndexConfig::default())
    }
}

impl SpatialIndex {
    /// Create an empty index.
    pub fn new(config: SpatialIndexConfig) -> Self {
        Self {
            config,
            slots: Vec::with_capacity(256),
            free: Vec::new(),
            id_to_slot: HashMap::with_capacity(256),
            live: 0,
            tree: PackedTree::default(),
            overflow: BTreeSet::new(),
            next_version: 1,
            mutations: 0,
            dirty_updates: 0,
            generation: 0,
            pending: None,
            rebuilds: 0,
            fallback_scans: Cell::new(0),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SpatialIndexConfig {
        &self.config
    }

    /// Insert a new item.
    pub fn insert(&mut self, item: SpatialItem) -> Result<(), SpatialIndexError> {
        if !item.bounds.is_valid() {
            return Err(SpatialIndexError::InvalidBounds {
                id: item.id,
                bounds: item.bounds,
            });
        }
        if self.id_to_slot.contains_key(&item.id) {
            return Err(SpatialIndexError::DuplicateId(item.id));
        }

        let version = self.bump_version();
        let slot = Slot {
            item,
            version,
            tree_version: None,
        };
        let id = slot.item.id.clone();
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };
        self.id_to_slot.insert(id, idx);
        self.overflow.insert(idx);
        self.live += 1;
        self.note_mutation();
        Ok(())
    }

    /// Move an item to new bounds.
    ///
    /// Returns `Ok(false)` when the bounds are identical to the current ones;
    /// nothing changes in that case, so repeated calls are harmless.
    pub fn update(&mut self, id: &str, bounds: AxisAlignedBox) -> Result<bool, SpatialIndexError> {
        if !bounds.is_valid() {
            return Err(SpatialIndexError::InvalidBounds {
                id: id.to_string(),
                bounds,
            });
        }
        let Some(&idx) = self.id_to_slot.get(id) else {
            return Err(SpatialIndexError::NotFound(id.to_string()));
        };
        let Some(current) = self.slot(idx).map(|s| s.item.bounds) else {
            return Err(SpatialIndexError::NotFound(id.to_string()));
        };
        if current == bounds {
            return Ok(false);
        }

        let version = self.bump_version();
        if let Some(slot) = self.slots[idx as usize].as_mut() {
            slot.item.bounds = bounds;
            slot.version = version;
        }
        self.overflow.insert(idx);
        self.note_mutation();
        Ok(true)
    }

    /// Remove an item, returning it if it was indexed.
    pub fn remove(&mut self, id: &str) -> Option<SpatialItem> {
        let idx = self.id_to_slot.remove(id)?;
        let slot = self.slots.get_mut(idx as usize)?.take()?;
        self.free.push(idx);
        self.overflow.remove(&idx);
        self.live = self.live.saturating_sub(1);
        self.note_mutation();
        Some(slot.item)
    }

    /// Look up an item by id.
    pub fn get(&self, id: &str) -> Option<&SpatialItem> {
        let idx = *self.id_to_slot.get(id)?;
        self.slot(idx).map(|s| &s.item)
    }

    /// Whether an item with this id is indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.id_to_slot.contains_key(id)
    }

    /// Every live item, in slot order.
    pub fn items(&self) -> impl Iterator<Item = &SpatialItem> + '_ {
        self.slots.iter().flatten().map(|s| &s.item)
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Remove every item and cancel any pending rebuild.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.id_to_slot.clear();
        self.overflow.clear();
        self.tree = PackedTree::default();
        self.live = 0;
        self.dirty_updates = 0;
        self.pending = None;
        self.generation += 1;
    }

    /// All items whose bounds intersect `rect`, without duplicates.
    ///
    /// Falls back to [`Self::query_linear`] when [`Self::validate`] fails.
    pub fn query(&self, rect: AxisAlignedBox) -> Vec<&SpatialItem> {
        if let Err(corruption) = self.validate() {
            archicanvas_core::warn!(
                error = %corruption,
                "spatial index failed validation, falling back to linear scan"
            );
            self.fallback_scans.set(self.fallback_scans.get() + 1);
            return self.query_linear(rect);
        }

        let mut out = Vec::new();
        self.tree.visit(&rect, |entry| {
            if let Some(slot) = self.slot(entry.slot)
                && slot.version == entry.version
            {
                out.push(&slot.item);
            }
        });
        for &idx in &self.overflow {
            if let Some(slot) = self.slot(idx)
                && !slot.in_tree()
                && slot.item.bounds.intersects(&rect)
            {
                out.push(&slot.item);
            }
        }
        out
    }

    /// Brute-force query over every slot. Always correct, O(n).
    pub fn query_linear(&self, rect: AxisAlignedBox) -> Vec<&SpatialItem> {
        self.slots
            .iter()
            .flatten()
            .filter(|s| s.item.bounds.intersects(&rect))
            .map(|s| &s.item)
            .collect()
    }

    /// Check the bookkeeping that queries rely on.
    pub fn validate(&self) -> Result<(), IndexCorruption> {
        if self.live != self.id_to_slot.len() {
            return Err(IndexCorruption::LiveCountMismatch {
                live: self.live,
                ids: self.id_to_slot.len(),
            });
        }
        if self.overflow.len() > self.live {
            return Err(IndexCorruption::OverflowExceedsLive {
                overflow: self.overflow.len(),
                live: self.live,
            });
        }
        if let Some(root) = self.tree.root
            && root as usize >= self.tree.nodes.len()
        {
            return Err(IndexCorruption::DanglingRoot);
        }
        Ok(())
    }

    /// Diagnostic statistics.
    pub fn stats(&self) -> SpatialIndexStats {
        SpatialIndexStats {
            item_count: self.live,
            height: self.tree.height,
            tree_entries: self.tree.entry_count,
            overflow_len: self.overflow.len(),
            dirty_updates: self.dirty_updates,
            rebuilds: self.rebuilds,
            fallback_scans: self.fallback_scans.get(),
            generation: self.generation,
        }
    }

    /// Rough heap footprint in bytes, for the stats overlay.
    pub fn approx_memory_bytes(&self) -> usize {
        let slots = self.slots.capacity() * std::mem::size_of::<Option<Slot>>();
        let ids: usize = self.id_to_slot.keys().map(|k| k.len() * 2).sum();
        let map = self.id_to_slot.capacity() * std::mem::size_of::<(String, u32)>();
        let nodes = self.tree.nodes.capacity() * std::mem::size_of::<Node>();
        let overflow = self.overflow.len() * std::mem::size_of::<u32>() * 2;
        slots + ids + map + nodes + overflow
    }

    // -----------------------------------------------------------------------
    // Rebuild scheduling
    // -----------------------------------------------------------------------

    /// Whether a chunked rebuild is in flight.
    pub fn rebuild_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Ticket of the in-flight rebuild, if any.
    pub fn pending_ticket(&self) -> Option<RebuildTicket> {
        self.pending.as_ref().map(|p| RebuildTicket {
            generation: p.generation,
        })
    }

    /// Start a new chunked rebuild, superseding any run in flight.
    pub fn schedule_rebuild(&mut self) -> RebuildTicket {
        self.generation += 1;
        let order: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as u32)
            .collect();
        archicanvas_core::debug!(
            generation = self.generation,
            items = order.len(),
            "spatial index rebuild scheduled"
        );
        self.pending = Some(PendingRebuild {
            generation: self.generation,
            order,
            cursor: 0,
            staged: Vec::with_capacity(self.live),
            mutations_at_start: self.mutations,
        });
        RebuildTicket {
            generation: self.generation,
        }
    }

    /// Run one chunk of the in-flight rebuild (call once per frame).
    pub fn tick(&mut self) -> RebuildProgress {
        match self.pending_ticket() {
            Some(ticket) => self.run_chunk(ticket),
            None => RebuildProgress::Idle,
        }
    }

    /// Run one chunk for `ticket`. Stale tickets do nothing.
    pub fn run_chunk(&mut self, ticket: RebuildTicket) -> RebuildProgress {
        if ticket.generation != self.generation {
            return RebuildProgress::Superseded;
        }
        let Some(mut pending) = self.pending.take() else {
            return RebuildProgress::Idle;
        };

        let batch = self.config.rebuild_batch_size.max(1);
        let end = (pending.cursor + batch).min(pending.order.len());
        for &idx in &pending.order[pending.cursor..end] {
            if let Some(slot) = self.slot(idx) {
                pending.staged.push(LeafEntry {
                    slot: idx,
                    version: slot.version,
                    bounds: slot.item.bounds,
                });
            }
        }
        pending.cursor = end;

        if pending.cursor < pending.order.len() {
            let progress = RebuildProgress::InProgress {
                processed: pending.cursor,
                total: pending.order.len(),
            };
            self.pending = Some(pending);
            return progress;
        }

        let items = pending.staged.len();
        let late_mutations = self.mutations.saturating_sub(pending.mutations_at_start);
        self.install_tree(pending.staged);
        self.dirty_updates = late_mutations as usize;
        RebuildProgress::Completed { items }
    }

    /// Rebuild synchronously, cancelling any chunked run.
    pub fn rebuild_now(&mut self) {
        self.generation += 1;
        self.pending = None;
        let staged: Vec<LeafEntry> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref().map(|s| LeafEntry {
                    slot: i as u32,
                    version: s.version,
                    bounds: s.item.bounds,
                })
            })
            .collect();
        self.install_tree(staged);
        self.dirty_updates = 0;
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    #[inline]
    fn slot(&self, idx: u32) -> Option<&Slot> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    fn bump_version(&mut self) -> u64 {
        let v = self.next_version;
        self.next_version += 1;
        v
    }

    fn note_mutation(&mut self) {
        self.mutations += 1;
        self.dirty_updates += 1;
        if self.dirty_updates >= self.config.rebuild_threshold && self.pending.is_none() {
            self.schedule_rebuild();
        }
    }

    /// Swap in a tree built from `staged` and repair derived bookkeeping.
    fn install_tree(&mut self, staged: Vec<LeafEntry>) {
        for entry in &staged {
            if let Some(Some(slot)) = self.slots.get_mut(entry.slot as usize)
                && slot.version == entry.version
            {
                slot.tree_version = Some(entry.version);
            }
        }
        self.tree = PackedTree::bulk_load(staged, self.config.node_capacity);

        self.overflow.clear();
        self.id_to_slot.clear();
        self.live = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                self.live += 1;
                self.id_to_slot.insert(slot.item.id.clone(), i as u32);
                if !slot.in_tree() {
                    self.overflow.insert(i as u32);
                }
            }
        }
        self.rebuilds += 1;
        archicanvas_core::debug!(
            items = self.tree.entry_count,
            height = self.tree.height,
            overflow = self.overflow.len(),
            "spatial index rebuilt"
        );
    }

    #[cfg(test)]
    fn corrupt_live_count(&mut self, live: usize) {
        self.live = live;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
