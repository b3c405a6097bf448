//! A concurrent B+ tree layered on the buffer pool.
//!
//! Descent uses latch crabbing: readers couple read latches parent-to-child;
//! writers hold write latches on the path and release every ancestor as soon
//! as the current node is safe (insert: has room; delete: above minimum).
//! The root identity lives in its own reader-writer cell and is persisted to
//! the header page on every transition.

use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::common::types::{
    PageId, PageReadGuard, PageWriteGuard, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header_page::HeaderPage;
use crate::index::btree::iterator::BPlusTreeIter;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{
    self, BTreePageType, InternalView, InternalViewMut, LeafView, LeafViewMut,
};
use crate::storage::buffer::BufferPoolManager;

/// Held latches of one write operation: the root-id cell guard (the sentinel
/// member of the set) plus the write-latched ancestor path, top-down. All of
/// it is released in one sweep once the current node is safe.
struct Context<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    write_set: Vec<PageWriteGuard>,
}

impl<'a> Context<'a> {
    fn new(root_guard: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root_guard: Some(root_guard),
            write_set: Vec::new(),
        }
    }

    fn root_id(&self) -> Option<PageId> {
        self.root_guard.as_ref().map(|guard| **guard)
    }

    fn holds_root(&self, page_id: PageId) -> bool {
        self.root_id() == Some(page_id)
    }

    /// Release the whole ancestor set: the root-id cell first, then the
    /// latched pages top-down. Ancestors released here were not modified.
    fn release_ancestors(&mut self, buffer_pool: &BufferPoolManager) {
        self.root_guard = None;
        for guard in self.write_set.drain(..) {
            let page_id = guard.page_id;
            drop(guard);
            buffer_pool.unpin_page(page_id, false);
        }
    }
}

/// An on-disk B+ tree index over unique fixed-width keys
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    internal_max_size: usize,
    header: HeaderPage,
    root_id: RwLock<PageId>,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open (or create) the index named `name` in the header page. Max sizes
    /// must leave room for a legal split and fit the page.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let index_name = name.into();
        assert!(leaf_max_size >= 3, "leaf max size must be at least 3");
        assert!(internal_max_size >= 3, "internal max size must be at least 3");
        assert!(
            leaf_max_size <= page::leaf_capacity::<K>(),
            "leaf max size {} exceeds page capacity {}",
            leaf_max_size,
            page::leaf_capacity::<K>()
        );
        assert!(
            internal_max_size < page::internal_capacity::<K>(),
            "internal max size {} exceeds page capacity {}",
            internal_max_size,
            page::internal_capacity::<K>()
        );

        let header = HeaderPage::new();
        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let (root_id, created) = {
            let mut guard = header_page.write();
            match header.get_root_id(&guard, &index_name) {
                Some(root_id) => (root_id, false),
                None => {
                    header.insert_record(&mut guard, &index_name, INVALID_PAGE_ID)?;
                    (INVALID_PAGE_ID, true)
                }
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, created);

        Ok(Self {
            index_name,
            buffer_pool,
            leaf_max_size,
            internal_max_size,
            header,
            root_id: RwLock::new(root_id),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id.read()
    }

    /// Point lookup with read-latch coupling down the tree
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root_guard = self.root_id.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(root_guard);

        loop {
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => {
                    let view = LeafView::<K>::new(&guard);
                    let result = view.lookup(key).ok().map(|index| view.rid_at(index));
                    self.release_read(guard);
                    return Ok(result);
                }
                BTreePageType::Internal => {
                    let child_id = InternalView::<K>::new(&guard).lookup_child(key);
                    let child_guard = match self.fetch_read(child_id) {
                        Ok(child_guard) => child_guard,
                        Err(e) => {
                            self.release_read(guard);
                            return Err(e);
                        }
                    };
                    self.release_read(guard);
                    guard = child_guard;
                }
                BTreePageType::Invalid => {
                    let page_id = guard.page_id;
                    self.release_read(guard);
                    return Err(BTreeError::Corrupted(format!(
                        "page {} has no node type",
                        page_id
                    )));
                }
            }
        }
    }

    /// Insert a key; false when the key is already present
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut ctx = Context::new(self.root_id.write());

        let root_id = ctx.root_id().unwrap_or(INVALID_PAGE_ID);
        if root_id == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, rid)?;
            return Ok(true);
        }

        let mut guard = self.fetch_write(root_id)?;
        if self.is_insert_safe(&guard.data) {
            ctx.release_ancestors(&self.buffer_pool);
        }

        loop {
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => break,
                BTreePageType::Internal => {
                    let child_id = InternalView::<K>::new(&guard).lookup_child(&key);
                    let child_guard = match self.fetch_write(child_id) {
                        Ok(child_guard) => child_guard,
                        Err(e) => {
                            self.release_write(guard, false);
                            ctx.release_ancestors(&self.buffer_pool);
                            return Err(e);
                        }
                    };
                    ctx.write_set.push(guard);
                    guard = child_guard;
                    if self.is_insert_safe(&guard.data) {
                        ctx.release_ancestors(&self.buffer_pool);
                    }
                }
                BTreePageType::Invalid => {
                    let page_id = guard.page_id;
                    self.release_write(guard, false);
                    ctx.release_ancestors(&self.buffer_pool);
                    return Err(BTreeError::Corrupted(format!(
                        "page {} has no node type",
                        page_id
                    )));
                }
            }
        }

        if LeafView::<K>::new(&guard).lookup(&key).is_ok() {
            self.release_write(guard, false);
            ctx.release_ancestors(&self.buffer_pool);
            return Ok(false);
        }

        if page::node_size(&guard.data) + 1 < self.leaf_max_size {
            LeafViewMut::<K>::new(&mut guard).insert(key, rid);
            self.release_write(guard, true);
            ctx.release_ancestors(&self.buffer_pool);
            return Ok(true);
        }

        // The leaf reaches max size with this insert: split it. The new
        // page is allocated before the leaf is touched so an out-of-memory
        // failure leaves the tree intact.
        let (new_leaf_id, new_leaf_page) = match self.buffer_pool.new_page() {
            Ok(allocated) => allocated,
            Err(e) => {
                self.release_write(guard, false);
                ctx.release_ancestors(&self.buffer_pool);
                return Err(e.into());
            }
        };
        let mut new_guard = new_leaf_page.write_arc();

        let promote_key;
        {
            let mut leaf = LeafViewMut::<K>::new(&mut guard);
            leaf.insert(key, rid);
            let entries = leaf.entries();
            let split_at = (self.leaf_max_size + 1) / 2;
            promote_key = entries[split_at].0;

            let old_next = leaf.next_leaf();
            leaf.set_entries(&entries[..split_at]);
            leaf.set_next_leaf(new_leaf_id);

            let mut new_leaf =
                LeafViewMut::<K>::init(&mut new_guard, new_leaf_id, self.leaf_max_size);
            new_leaf.set_entries(&entries[split_at..]);
            new_leaf.set_next_leaf(old_next);
        }
        let parent_id = page::parent_page_id(&guard.data);
        page::set_parent_page_id(&mut new_guard.data, parent_id);

        self.insert_into_parent(&mut ctx, guard, promote_key, new_guard)?;
        Ok(true)
    }

    /// Remove a key; silent no-op when absent
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ctx = Context::new(self.root_id.write());

        let root_id = ctx.root_id().unwrap_or(INVALID_PAGE_ID);
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut guard = self.fetch_write(root_id)?;
        if self.is_root_delete_safe(&guard.data) {
            ctx.release_ancestors(&self.buffer_pool);
        }

        loop {
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => break,
                BTreePageType::Internal => {
                    let child_id = InternalView::<K>::new(&guard).lookup_child(key);
                    let child_guard = match self.fetch_write(child_id) {
                        Ok(child_guard) => child_guard,
                        Err(e) => {
                            self.release_write(guard, false);
                            ctx.release_ancestors(&self.buffer_pool);
                            return Err(e);
                        }
                    };
                    ctx.write_set.push(guard);
                    guard = child_guard;
                    if self.is_delete_safe(&guard.data) {
                        ctx.release_ancestors(&self.buffer_pool);
                    }
                }
                BTreePageType::Invalid => {
                    let page_id = guard.page_id;
                    self.release_write(guard, false);
                    ctx.release_ancestors(&self.buffer_pool);
                    return Err(BTreeError::Corrupted(format!(
                        "page {} has no node type",
                        page_id
                    )));
                }
            }
        }

        let index = match LeafView::<K>::new(&guard).lookup(key) {
            Ok(index) => index,
            Err(_) => {
                self.release_write(guard, false);
                ctx.release_ancestors(&self.buffer_pool);
                return Ok(());
            }
        };
        LeafViewMut::<K>::new(&mut guard).remove_at(index);

        self.handle_underflow(&mut ctx, guard)
    }

    /// Forward iterator over the whole tree
    pub fn iter(&self) -> Result<BPlusTreeIter<K>, BTreeError> {
        self.leaf_scan_start(None)
    }

    /// Forward iterator over all keys >= `key`
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIter<K>, BTreeError> {
        self.leaf_scan_start(Some(key))
    }

    fn leaf_scan_start(&self, start: Option<&K>) -> Result<BPlusTreeIter<K>, BTreeError> {
        let root_guard = self.root_id.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(BPlusTreeIter::empty(Arc::clone(&self.buffer_pool)));
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(root_guard);

        loop {
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => {
                    let index = match start {
                        None => 0,
                        Some(key) => {
                            let view = LeafView::<K>::new(&guard);
                            match view.lookup(key) {
                                Ok(index) => index,
                                Err(index) => index,
                            }
                        }
                    };
                    return Ok(BPlusTreeIter::new(
                        Arc::clone(&self.buffer_pool),
                        guard,
                        index,
                    ));
                }
                BTreePageType::Internal => {
                    let view = InternalView::<K>::new(&guard);
                    let child_id = match start {
                        None => view.child_at(0),
                        Some(key) => view.lookup_child(key),
                    };
                    let child_guard = match self.fetch_read(child_id) {
                        Ok(child_guard) => child_guard,
                        Err(e) => {
                            self.release_read(guard);
                            return Err(e);
                        }
                    };
                    self.release_read(guard);
                    guard = child_guard;
                }
                BTreePageType::Invalid => {
                    let page_id = guard.page_id;
                    self.release_read(guard);
                    return Err(BTreeError::Corrupted(format!(
                        "page {} has no node type",
                        page_id
                    )));
                }
            }
        }
    }

    // ---- write-path internals ----

    fn start_new_tree(&self, ctx: &mut Context<'_>, key: K, rid: Rid) -> Result<(), BTreeError> {
        let (page_id, page) = self.buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            let mut leaf = LeafViewMut::<K>::init(&mut guard, page_id, self.leaf_max_size);
            leaf.insert(key, rid);
        }
        self.buffer_pool.unpin_page(page_id, true);

        if let Some(root_guard) = ctx.root_guard.as_mut() {
            **root_guard = page_id;
        }
        debug!("index {}: new root leaf {}", self.index_name, page_id);
        let result = self.persist_root(page_id);
        ctx.root_guard = None;
        result
    }

    /// Propagate a split upward: `left` kept its page, `right` is freshly
    /// allocated, `key` separates them. Loops toward the root, splitting
    /// full parents as it goes.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        mut left_guard: PageWriteGuard,
        mut key: K,
        mut right_guard: PageWriteGuard,
    ) -> Result<(), BTreeError> {
        loop {
            let left_id = left_guard.page_id;
            let right_id = right_guard.page_id;

            if ctx.write_set.is_empty() {
                // The split reached the root: grow a level
                debug_assert!(ctx.holds_root(left_id));
                let (new_root_id, new_root_page) = match self.buffer_pool.new_page() {
                    Ok(allocated) => allocated,
                    Err(e) => {
                        self.release_write(left_guard, true);
                        self.release_write(right_guard, true);
                        ctx.release_ancestors(&self.buffer_pool);
                        return Err(e.into());
                    }
                };
                {
                    let mut guard = new_root_page.write();
                    let mut root = InternalViewMut::<K>::init(
                        &mut guard,
                        new_root_id,
                        self.internal_max_size,
                    );
                    root.populate_new_root(left_id, key, right_id);
                }
                self.buffer_pool.unpin_page(new_root_id, true);

                page::set_parent_page_id(&mut left_guard.data, new_root_id);
                page::set_parent_page_id(&mut right_guard.data, new_root_id);
                self.release_write(left_guard, true);
                self.release_write(right_guard, true);

                if let Some(root_guard) = ctx.root_guard.as_mut() {
                    **root_guard = new_root_id;
                }
                debug!("index {}: root grew to {}", self.index_name, new_root_id);
                let result = self.persist_root(new_root_id);
                ctx.root_guard = None;
                return result;
            }

            let mut parent_guard = ctx
                .write_set
                .pop()
                .expect("ancestor path holds the parent of an unsafe child");
            let parent_id = parent_guard.page_id;

            if page::node_size(&parent_guard.data) < self.internal_max_size {
                InternalViewMut::<K>::new(&mut parent_guard).insert_node_after(
                    left_id, key, right_id,
                );
                page::set_parent_page_id(&mut right_guard.data, parent_id);
                self.release_write(left_guard, true);
                self.release_write(right_guard, true);
                self.release_write(parent_guard, true);
                ctx.release_ancestors(&self.buffer_pool);
                return Ok(());
            }

            // Parent is full: split it around the pushed-up entry
            let mut entries = InternalView::<K>::new(&parent_guard).entries();
            let position = entries
                .iter()
                .position(|&(_, child)| child == left_id)
                .expect("split child must be present in its parent");
            entries.insert(position + 1, (key, right_id));

            let (new_internal_id, new_internal_page) = match self.buffer_pool.new_page() {
                Ok(allocated) => allocated,
                Err(e) => {
                    self.release_write(left_guard, true);
                    self.release_write(right_guard, true);
                    self.release_write(parent_guard, false);
                    ctx.release_ancestors(&self.buffer_pool);
                    return Err(e.into());
                }
            };
            let mut new_internal_guard = new_internal_page.write_arc();

            let split_at = (self.internal_max_size + 1) / 2;
            let promote = entries[split_at].0;

            InternalViewMut::<K>::new(&mut parent_guard).set_entries(&entries[..split_at]);
            {
                let mut new_internal = InternalViewMut::<K>::init(
                    &mut new_internal_guard,
                    new_internal_id,
                    self.internal_max_size,
                );
                let mut right_entries = entries[split_at..].to_vec();
                right_entries[0].0 = K::default();
                new_internal.set_entries(&right_entries);
            }
            page::set_parent_page_id(
                &mut new_internal_guard.data,
                page::parent_page_id(&parent_guard.data),
            );

            // children moved to the new node change parents
            let mut reparent_result = Ok(());
            for &(_, child_id) in &entries[split_at..] {
                if child_id == left_id {
                    page::set_parent_page_id(&mut left_guard.data, new_internal_id);
                } else if child_id == right_id {
                    page::set_parent_page_id(&mut right_guard.data, new_internal_id);
                } else if let Err(e) = self.reparent(child_id, new_internal_id) {
                    reparent_result = Err(e);
                    break;
                }
            }
            self.release_write(left_guard, true);
            self.release_write(right_guard, true);
            if let Err(e) = reparent_result {
                self.release_write(parent_guard, true);
                self.release_write(new_internal_guard, true);
                ctx.release_ancestors(&self.buffer_pool);
                return Err(e);
            }

            left_guard = parent_guard;
            right_guard = new_internal_guard;
            key = promote;
        }
    }

    /// Rebalance after a deletion, walking up while nodes underflow
    fn handle_underflow(
        &self,
        ctx: &mut Context<'_>,
        mut guard: PageWriteGuard,
    ) -> Result<(), BTreeError> {
        loop {
            let node_id = guard.page_id;
            let is_leaf = page::page_type(&guard.data) == BTreePageType::Leaf;
            let size = page::node_size(&guard.data);

            if ctx.holds_root(node_id) {
                return self.adjust_root(ctx, guard);
            }

            let min = if is_leaf {
                self.leaf_min()
            } else {
                self.internal_min()
            };
            // An empty ancestor set means this node was deemed safe during
            // descent (it is the root, or above minimum); nothing propagates.
            if size >= min || ctx.write_set.is_empty() {
                self.release_write(guard, true);
                ctx.release_ancestors(&self.buffer_pool);
                return Ok(());
            }

            let mut parent_guard = ctx
                .write_set
                .pop()
                .expect("underflowing node has a latched parent");

            let (node_index, sibling_id) = {
                let parent = InternalView::<K>::new(&parent_guard);
                let index = parent
                    .child_index_of(node_id)
                    .expect("node must be a child of its latched parent");
                let sibling_index = if index > 0 { index - 1 } else { index + 1 };
                (index, parent.child_at(sibling_index))
            };

            let sibling_page = match self.buffer_pool.fetch_page(sibling_id) {
                Ok(page) => page,
                Err(e) => {
                    self.release_write(guard, true);
                    self.release_write(parent_guard, true);
                    ctx.release_ancestors(&self.buffer_pool);
                    return Err(e.into());
                }
            };
            let mut sibling_guard = sibling_page.write_arc();
            let sibling_size = page::node_size(&sibling_guard.data);

            let fits = if is_leaf {
                size + sibling_size <= self.leaf_max_size - 1
            } else {
                size + sibling_size <= self.internal_max_size
            };

            if !fits {
                let result = self.redistribute(
                    &mut guard,
                    &mut sibling_guard,
                    &mut parent_guard,
                    node_index,
                    is_leaf,
                );
                self.release_write(guard, true);
                self.release_write(sibling_guard, true);
                self.release_write(parent_guard, true);
                ctx.release_ancestors(&self.buffer_pool);
                return result;
            }

            // Coalesce: drain the higher-indexed node into the lower-indexed
            // one, recovering the separator through the parent. The lower
            // node keeps the leaf chain intact (lower.next becomes
            // higher.next), and the drained page is freed.
            let (mut lower_guard, mut higher_guard, separator_index) = if node_index > 0 {
                (sibling_guard, guard, node_index)
            } else {
                (guard, sibling_guard, node_index + 1)
            };
            let lower_id = lower_guard.page_id;
            let higher_id = higher_guard.page_id;

            if is_leaf {
                let higher_entries = LeafView::<K>::new(&higher_guard).entries();
                let next = LeafView::<K>::new(&higher_guard).next_leaf();
                let mut lower = LeafViewMut::<K>::new(&mut lower_guard);
                for (key, rid) in higher_entries {
                    lower.push(key, rid);
                }
                lower.set_next_leaf(next);
            } else {
                let separator = InternalView::<K>::new(&parent_guard).key_at(separator_index);
                let mut merged = InternalView::<K>::new(&lower_guard).entries();
                let higher_entries = InternalView::<K>::new(&higher_guard).entries();
                let moved: Vec<PageId> =
                    higher_entries.iter().map(|&(_, child)| child).collect();
                for (i, (key, child)) in higher_entries.into_iter().enumerate() {
                    let key = if i == 0 { separator } else { key };
                    merged.push((key, child));
                }
                InternalViewMut::<K>::new(&mut lower_guard).set_entries(&merged);

                let mut reparent_result = Ok(());
                for child_id in moved {
                    if let Err(e) = self.reparent(child_id, lower_id) {
                        reparent_result = Err(e);
                        break;
                    }
                }
                if let Err(e) = reparent_result {
                    self.release_write(lower_guard, true);
                    self.release_write(higher_guard, true);
                    self.release_write(parent_guard, true);
                    ctx.release_ancestors(&self.buffer_pool);
                    return Err(e);
                }
            }

            InternalViewMut::<K>::new(&mut parent_guard).remove_at(separator_index);

            page::set_node_size(&mut higher_guard.data, 0);
            self.release_write(higher_guard, false);
            self.buffer_pool.delete_page(higher_id)?;
            self.release_write(lower_guard, true);

            guard = parent_guard;
        }
    }

    /// Move one entry from the sibling, rotating the separator through the
    /// parent so the internal key invariant holds.
    fn redistribute(
        &self,
        guard: &mut PageWriteGuard,
        sibling_guard: &mut PageWriteGuard,
        parent_guard: &mut PageWriteGuard,
        node_index: usize,
        is_leaf: bool,
    ) -> Result<(), BTreeError> {
        let node_id = guard.page_id;
        let sibling_size = page::node_size(&sibling_guard.data);

        if is_leaf {
            if node_index > 0 {
                // sibling on the left: its last pair becomes our first
                let (key, rid) = {
                    let sibling = LeafView::<K>::new(sibling_guard);
                    (
                        sibling.key_at(sibling_size - 1),
                        sibling.rid_at(sibling_size - 1),
                    )
                };
                LeafViewMut::<K>::new(sibling_guard).remove_at(sibling_size - 1);
                LeafViewMut::<K>::new(guard).insert_at(0, key, rid);
                InternalViewMut::<K>::new(parent_guard).set_key_at(node_index, key);
            } else {
                // sibling on the right: its first pair becomes our last
                let (key, rid) = {
                    let sibling = LeafView::<K>::new(sibling_guard);
                    (sibling.key_at(0), sibling.rid_at(0))
                };
                LeafViewMut::<K>::new(sibling_guard).remove_at(0);
                let new_separator = LeafView::<K>::new(sibling_guard).key_at(0);
                LeafViewMut::<K>::new(guard).push(key, rid);
                InternalViewMut::<K>::new(parent_guard).set_key_at(node_index + 1, new_separator);
            }
        } else if node_index > 0 {
            // rotate right: sibling's last child moves to our front
            let separator = InternalView::<K>::new(parent_guard).key_at(node_index);
            let (moved_key, moved_child) = {
                let sibling = InternalView::<K>::new(sibling_guard);
                (
                    sibling.key_at(sibling_size - 1),
                    sibling.child_at(sibling_size - 1),
                )
            };
            let mut entries = InternalView::<K>::new(guard).entries();
            entries[0].0 = separator;
            entries.insert(0, (K::default(), moved_child));
            InternalViewMut::<K>::new(guard).set_entries(&entries);
            InternalViewMut::<K>::new(sibling_guard).remove_at(sibling_size - 1);
            InternalViewMut::<K>::new(parent_guard).set_key_at(node_index, moved_key);
            self.reparent(moved_child, node_id)?;
        } else {
            // rotate left: sibling's first child moves to our end
            let separator = InternalView::<K>::new(parent_guard).key_at(node_index + 1);
            let (moved_child, next_key) = {
                let sibling = InternalView::<K>::new(sibling_guard);
                (sibling.child_at(0), sibling.key_at(1))
            };
            let mut entries = InternalView::<K>::new(guard).entries();
            entries.push((separator, moved_child));
            InternalViewMut::<K>::new(guard).set_entries(&entries);
            let mut sibling_entries = InternalView::<K>::new(sibling_guard).entries();
            sibling_entries.remove(0);
            sibling_entries[0].0 = K::default();
            InternalViewMut::<K>::new(sibling_guard).set_entries(&sibling_entries);
            InternalViewMut::<K>::new(parent_guard).set_key_at(node_index + 1, next_key);
            self.reparent(moved_child, node_id)?;
        }

        Ok(())
    }

    /// Root transitions after deletion: an internal root with one child
    /// hands the root to that child; an empty leaf root empties the tree.
    fn adjust_root(&self, ctx: &mut Context<'_>, guard: PageWriteGuard) -> Result<(), BTreeError> {
        let root_id = guard.page_id;
        let is_leaf = page::page_type(&guard.data) == BTreePageType::Leaf;
        let size = page::node_size(&guard.data);

        if !is_leaf && size == 1 {
            let only_child = InternalView::<K>::new(&guard).child_at(0);
            if let Err(e) = self.reparent(only_child, INVALID_PAGE_ID) {
                self.release_write(guard, true);
                ctx.release_ancestors(&self.buffer_pool);
                return Err(e);
            }
            if let Some(root_guard) = ctx.root_guard.as_mut() {
                **root_guard = only_child;
            }
            debug!("index {}: root collapsed to {}", self.index_name, only_child);
            self.release_write(guard, false);
            self.buffer_pool.delete_page(root_id)?;
            let result = self.persist_root(only_child);
            ctx.root_guard = None;
            return result;
        }

        if is_leaf && size == 0 {
            if let Some(root_guard) = ctx.root_guard.as_mut() {
                **root_guard = INVALID_PAGE_ID;
            }
            debug!("index {}: tree emptied", self.index_name);
            self.release_write(guard, false);
            self.buffer_pool.delete_page(root_id)?;
            let result = self.persist_root(INVALID_PAGE_ID);
            ctx.root_guard = None;
            return result;
        }

        self.release_write(guard, true);
        ctx.release_ancestors(&self.buffer_pool);
        Ok(())
    }

    // ---- helpers ----

    fn fetch_read(&self, page_id: PageId) -> Result<PageReadGuard, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        Ok(page.read_arc())
    }

    fn fetch_write(&self, page_id: PageId) -> Result<PageWriteGuard, BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        Ok(page.write_arc())
    }

    fn release_read(&self, guard: PageReadGuard) {
        let page_id = guard.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false);
    }

    fn release_write(&self, guard: PageWriteGuard, dirty: bool) {
        let page_id = guard.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, dirty);
    }

    fn reparent(&self, child_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut guard = page.write();
            page::set_parent_page_id(&mut guard.data, parent_id);
        }
        self.buffer_pool.unpin_page(child_id, true);
        Ok(())
    }

    fn persist_root(&self, root_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let result = {
            let mut guard = page.write();
            if self.header.update_record(&mut guard, &self.index_name, root_id) {
                Ok(())
            } else {
                self.header.insert_record(&mut guard, &self.index_name, root_id)
            }
        };
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        result
    }

    fn leaf_min(&self) -> usize {
        self.leaf_max_size / 2
    }

    fn internal_min(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    fn is_insert_safe(&self, data: &[u8]) -> bool {
        match page::page_type(data) {
            BTreePageType::Leaf => page::node_size(data) + 1 < self.leaf_max_size,
            BTreePageType::Internal => page::node_size(data) < self.internal_max_size,
            BTreePageType::Invalid => false,
        }
    }

    fn is_delete_safe(&self, data: &[u8]) -> bool {
        match page::page_type(data) {
            BTreePageType::Leaf => page::node_size(data) > self.leaf_min(),
            BTreePageType::Internal => page::node_size(data) > self.internal_min(),
            BTreePageType::Invalid => false,
        }
    }

    fn is_root_delete_safe(&self, data: &[u8]) -> bool {
        match page::page_type(data) {
            BTreePageType::Leaf => page::node_size(data) > 1,
            BTreePageType::Internal => page::node_size(data) > 2,
            BTreePageType::Invalid => false,
        }
    }

    // ---- integrity checking (test hook) ----

    /// Walk the whole tree and verify its structural invariants: ordered
    /// keys, size bounds, parent links, uniform leaf depth and a complete
    /// leaf chain. Intended for single-threaded verification.
    pub fn check_integrity(&self) -> Result<(), BTreeError> {
        let root_id = *self.root_id.read();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaves: Vec<(PageId, PageId)> = Vec::new();
        let mut leaf_depth: Option<usize> = None;
        self.verify_node(
            root_id,
            INVALID_PAGE_ID,
            None,
            None,
            0,
            &mut leaves,
            &mut leaf_depth,
        )?;

        for window in leaves.windows(2) {
            let (leaf, next) = window[0];
            let (successor, _) = window[1];
            if next != successor {
                return Err(BTreeError::Corrupted(format!(
                    "leaf {} links to {} but the next leaf in key order is {}",
                    leaf, next, successor
                )));
            }
        }
        if let Some(&(last_leaf, next)) = leaves.last() {
            if next != INVALID_PAGE_ID {
                return Err(BTreeError::Corrupted(format!(
                    "last leaf {} should end the chain but links to {}",
                    last_leaf, next
                )));
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
        depth: usize,
        leaves: &mut Vec<(PageId, PageId)>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<(), BTreeError> {
        let corrupted = |message: String| Err(BTreeError::Corrupted(message));

        let page = self.buffer_pool.fetch_page(page_id)?;
        let is_root = expected_parent == INVALID_PAGE_ID;

        enum NodeSummary<K> {
            Leaf {
                keys: Vec<K>,
                next: PageId,
            },
            Internal {
                entries: Vec<(K, PageId)>,
            },
        }

        let summary = {
            let guard = page.read();
            if page::parent_page_id(&guard.data) != expected_parent {
                self.buffer_pool.unpin_page(page_id, false);
                return corrupted(format!(
                    "page {} records parent {} but was reached from {}",
                    page_id,
                    page::parent_page_id(&guard.data),
                    expected_parent
                ));
            }
            if page::node_page_id(&guard.data) != page_id {
                self.buffer_pool.unpin_page(page_id, false);
                return corrupted(format!("page {} misrecords its own id", page_id));
            }
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => {
                    let view = LeafView::<K>::new(&guard);
                    NodeSummary::Leaf {
                        keys: (0..view.size()).map(|i| view.key_at(i)).collect(),
                        next: view.next_leaf(),
                    }
                }
                BTreePageType::Internal => {
                    let view = InternalView::<K>::new(&guard);
                    NodeSummary::Internal {
                        entries: view.entries(),
                    }
                }
                BTreePageType::Invalid => {
                    self.buffer_pool.unpin_page(page_id, false);
                    return corrupted(format!("page {} has no node type", page_id));
                }
            }
        };
        self.buffer_pool.unpin_page(page_id, false);

        match summary {
            NodeSummary::Leaf { keys, next } => {
                match leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) if *expected != depth => {
                        return corrupted(format!(
                            "leaf {} at depth {} but other leaves are at {}",
                            page_id, depth, expected
                        ));
                    }
                    _ => {}
                }
                if !is_root && (keys.len() < self.leaf_min() || keys.len() > self.leaf_max_size - 1)
                {
                    return corrupted(format!(
                        "leaf {} holds {} entries outside [{}, {}]",
                        page_id,
                        keys.len(),
                        self.leaf_min(),
                        self.leaf_max_size - 1
                    ));
                }
                for window in keys.windows(2) {
                    if window[0] >= window[1] {
                        return corrupted(format!("leaf {} keys out of order", page_id));
                    }
                }
                if let (Some(lower), Some(first)) = (lower, keys.first()) {
                    if *first < lower {
                        return corrupted(format!("leaf {} violates its lower bound", page_id));
                    }
                }
                if let (Some(upper), Some(last)) = (upper, keys.last()) {
                    if *last >= upper {
                        return corrupted(format!("leaf {} violates its upper bound", page_id));
                    }
                }
                leaves.push((page_id, next));
            }
            NodeSummary::Internal { entries } => {
                let size = entries.len();
                let min = if is_root { 2 } else { self.internal_min() };
                if size < min || size > self.internal_max_size {
                    return corrupted(format!(
                        "internal {} has {} children outside [{}, {}]",
                        page_id, size, min, self.internal_max_size
                    ));
                }
                for window in entries[1..].windows(2) {
                    if window[0].0 >= window[1].0 {
                        return corrupted(format!("internal {} keys out of order", page_id));
                    }
                }
                for (i, &(key, child)) in entries.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(key) };
                    let child_upper = if i + 1 < size {
                        Some(entries[i + 1].0)
                    } else {
                        upper
                    };
                    self.verify_node(
                        child,
                        page_id,
                        child_lower,
                        child_upper,
                        depth + 1,
                        leaves,
                        leaf_depth,
                    )?;
                }
            }
        }

        Ok(())
    }
}
