//! On-page layout of B+ tree nodes.
//!
//! Every node page starts with a common header (page type, LSN, current
//! size, max size, parent id, own id); leaves add a next-leaf pointer. The
//! payload is an ordered pair array read in place through typed views; no
//! node objects are constructed in the page buffer.

use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::key::IndexKey;

pub const PAGE_TYPE_OFFSET: usize = 0;
pub const LSN_OFFSET: usize = 4;
pub const SIZE_OFFSET: usize = 8;
pub const MAX_SIZE_OFFSET: usize = 12;
pub const PARENT_OFFSET: usize = 16;
pub const PAGE_ID_OFFSET: usize = 20;
pub const COMMON_HEADER_LEN: usize = 24;
pub const NEXT_LEAF_OFFSET: usize = 24;
pub const LEAF_HEADER_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreePageType {
    Invalid = 0,
    Leaf = 1,
    Internal = 2,
}

pub fn page_type(data: &[u8]) -> BTreePageType {
    match LittleEndian::read_u32(&data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4]) {
        1 => BTreePageType::Leaf,
        2 => BTreePageType::Internal,
        _ => BTreePageType::Invalid,
    }
}

pub fn set_page_type(data: &mut [u8], page_type: BTreePageType) {
    LittleEndian::write_u32(
        &mut data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
        page_type as u32,
    );
}

pub fn node_size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize
}

pub fn set_node_size(data: &mut [u8], size: usize) {
    LittleEndian::write_u32(&mut data[SIZE_OFFSET..SIZE_OFFSET + 4], size as u32);
}

pub fn node_max_size(data: &[u8]) -> usize {
    LittleEndian::read_u32(&data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize
}

pub fn set_node_max_size(data: &mut [u8], max_size: usize) {
    LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size as u32);
}

pub fn parent_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[PARENT_OFFSET..PARENT_OFFSET + 4])
}

pub fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    LittleEndian::write_u32(&mut data[PARENT_OFFSET..PARENT_OFFSET + 4], parent);
}

pub fn node_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4])
}

pub fn set_node_page_id(data: &mut [u8], page_id: PageId) {
    LittleEndian::write_u32(&mut data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], page_id);
}

pub fn next_leaf_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4])
}

pub fn set_next_leaf_page_id(data: &mut [u8], next: PageId) {
    LittleEndian::write_u32(&mut data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4], next);
}

/// Largest leaf max size whose pair array fits in a page
pub fn leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_LEN) / (K::ENCODED_LEN + Rid::ENCODED_LEN)
}

/// Largest internal max size whose pair array fits in a page
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - COMMON_HEADER_LEN) / (K::ENCODED_LEN + 4)
}

fn leaf_pair_offset<K: IndexKey>(index: usize) -> usize {
    LEAF_HEADER_LEN + index * (K::ENCODED_LEN + Rid::ENCODED_LEN)
}

fn internal_pair_offset<K: IndexKey>(index: usize) -> usize {
    COMMON_HEADER_LEN + index * (K::ENCODED_LEN + 4)
}

fn leaf_key_at<K: IndexKey>(data: &[u8], index: usize) -> K {
    let offset = leaf_pair_offset::<K>(index);
    K::decode(&data[offset..offset + K::ENCODED_LEN])
}

fn leaf_rid_at<K: IndexKey>(data: &[u8], index: usize) -> Rid {
    let offset = leaf_pair_offset::<K>(index) + K::ENCODED_LEN;
    Rid::read_from(&data[offset..offset + Rid::ENCODED_LEN])
}

fn internal_key_at<K: IndexKey>(data: &[u8], index: usize) -> K {
    let offset = internal_pair_offset::<K>(index);
    K::decode(&data[offset..offset + K::ENCODED_LEN])
}

fn internal_child_at<K: IndexKey>(data: &[u8], index: usize) -> PageId {
    let offset = internal_pair_offset::<K>(index) + K::ENCODED_LEN;
    LittleEndian::read_u32(&data[offset..offset + 4])
}

/// Read-only view over a leaf node page
pub struct LeafView<'a, K> {
    page: &'a Page,
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafView<'a, K> {
    pub fn new(page: &'a Page) -> Self {
        debug_assert_eq!(page_type(&page.data), BTreePageType::Leaf);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        node_size(&self.page.data)
    }

    pub fn max_size(&self) -> usize {
        node_max_size(&self.page.data)
    }

    pub fn next_leaf(&self) -> PageId {
        next_leaf_page_id(&self.page.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        leaf_key_at::<K>(&self.page.data, index)
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        debug_assert!(index < self.size());
        leaf_rid_at::<K>(&self.page.data, index)
    }

    /// Binary search for a key: Ok(position) if present, Err(insertion
    /// point) otherwise.
    pub fn lookup(&self, key: &K) -> Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.size();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Err(lo)
    }

    pub fn entries(&self) -> Vec<(K, Rid)> {
        (0..self.size())
            .map(|i| (self.key_at(i), self.rid_at(i)))
            .collect()
    }
}

/// Mutable view over a leaf node page
pub struct LeafViewMut<'a, K> {
    page: &'a mut Page,
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafViewMut<'a, K> {
    pub fn new(page: &'a mut Page) -> Self {
        debug_assert_eq!(page_type(&page.data), BTreePageType::Leaf);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    /// Lay down a fresh, empty leaf
    pub fn init(page: &'a mut Page, page_id: PageId, max_size: usize) -> Self {
        page.data[..LEAF_HEADER_LEN].fill(0);
        set_page_type(&mut page.data, BTreePageType::Leaf);
        set_node_size(&mut page.data, 0);
        set_node_max_size(&mut page.data, max_size);
        set_parent_page_id(&mut page.data, INVALID_PAGE_ID);
        set_node_page_id(&mut page.data, page_id);
        set_next_leaf_page_id(&mut page.data, INVALID_PAGE_ID);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        node_size(&self.page.data)
    }

    pub fn next_leaf(&self) -> PageId {
        next_leaf_page_id(&self.page.data)
    }

    pub fn set_next_leaf(&mut self, next: PageId) {
        set_next_leaf_page_id(&mut self.page.data, next);
    }

    pub fn key_at(&self, index: usize) -> K {
        leaf_key_at::<K>(&self.page.data, index)
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        leaf_rid_at::<K>(&self.page.data, index)
    }

    pub fn lookup(&self, key: &K) -> Result<usize, usize> {
        LeafView::<K>::new(&*self.page).lookup(key)
    }

    /// Insert a pair at its sorted position. The caller ensures the key is
    /// not already present and the page has room for one more pair.
    pub fn insert(&mut self, key: K, rid: Rid) {
        let position = match self.lookup(&key) {
            Ok(_) => unreachable!("duplicate key inserted into leaf"),
            Err(position) => position,
        };
        self.insert_at(position, key, rid);
    }

    pub fn insert_at(&mut self, index: usize, key: K, rid: Rid) {
        let size = self.size();
        debug_assert!(index <= size);
        let pair = K::ENCODED_LEN + Rid::ENCODED_LEN;
        let start = leaf_pair_offset::<K>(index);
        let end = leaf_pair_offset::<K>(size);
        self.page.data.copy_within(start..end, start + pair);
        key.encode(&mut self.page.data[start..start + K::ENCODED_LEN]);
        rid.write_to(&mut self.page.data[start + K::ENCODED_LEN..start + pair]);
        set_node_size(&mut self.page.data, size + 1);
    }

    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        let pair = K::ENCODED_LEN + Rid::ENCODED_LEN;
        let start = leaf_pair_offset::<K>(index);
        let end = leaf_pair_offset::<K>(size);
        self.page.data.copy_within(start + pair..end, start);
        set_node_size(&mut self.page.data, size - 1);
    }

    /// Append a pair at the end; keys must stay ordered
    pub fn push(&mut self, key: K, rid: Rid) {
        let size = self.size();
        self.insert_at(size, key, rid);
    }

    /// Replace the whole pair array
    pub fn set_entries(&mut self, entries: &[(K, Rid)]) {
        for (i, (key, rid)) in entries.iter().enumerate() {
            let start = leaf_pair_offset::<K>(i);
            key.encode(&mut self.page.data[start..start + K::ENCODED_LEN]);
            rid.write_to(
                &mut self.page.data
                    [start + K::ENCODED_LEN..start + K::ENCODED_LEN + Rid::ENCODED_LEN],
            );
        }
        set_node_size(&mut self.page.data, entries.len());
    }

    pub fn entries(&self) -> Vec<(K, Rid)> {
        LeafView::<K>::new(&*self.page).entries()
    }
}

/// Read-only view over an internal node page. `size` counts children; the
/// key at index 0 is unused, children at index i >= 1 hold keys >= key(i).
pub struct InternalView<'a, K> {
    page: &'a Page,
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalView<'a, K> {
    pub fn new(page: &'a Page) -> Self {
        debug_assert_eq!(page_type(&page.data), BTreePageType::Internal);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        node_size(&self.page.data)
    }

    pub fn max_size(&self) -> usize {
        node_max_size(&self.page.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index >= 1 && index < self.size());
        internal_key_at::<K>(&self.page.data, index)
    }

    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        internal_child_at::<K>(&self.page.data, index)
    }

    pub fn child_index_of(&self, page_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == page_id)
    }

    /// Index of the child subtree a key belongs to: the largest i with
    /// key(i) <= key, or 0 when the key precedes key(1).
    pub fn lookup_child(&self, key: &K) -> PageId {
        let size = self.size();
        let mut lo = 1usize;
        let mut hi = size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.child_at(lo - 1)
    }

    /// Pairs (key, child); the entry at index 0 carries a default key
    pub fn entries(&self) -> Vec<(K, PageId)> {
        (0..self.size())
            .map(|i| {
                let key = if i == 0 {
                    K::default()
                } else {
                    self.key_at(i)
                };
                (key, self.child_at(i))
            })
            .collect()
    }
}

/// Mutable view over an internal node page
pub struct InternalViewMut<'a, K> {
    page: &'a mut Page,
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalViewMut<'a, K> {
    pub fn new(page: &'a mut Page) -> Self {
        debug_assert_eq!(page_type(&page.data), BTreePageType::Internal);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn init(page: &'a mut Page, page_id: PageId, max_size: usize) -> Self {
        page.data[..COMMON_HEADER_LEN].fill(0);
        set_page_type(&mut page.data, BTreePageType::Internal);
        set_node_size(&mut page.data, 0);
        set_node_max_size(&mut page.data, max_size);
        set_parent_page_id(&mut page.data, INVALID_PAGE_ID);
        set_node_page_id(&mut page.data, page_id);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        node_size(&self.page.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        internal_key_at::<K>(&self.page.data, index)
    }

    pub fn child_at(&self, index: usize) -> PageId {
        internal_child_at::<K>(&self.page.data, index)
    }

    pub fn set_key_at(&mut self, index: usize, key: K) {
        debug_assert!(index >= 1 && index < self.size());
        let offset = internal_pair_offset::<K>(index);
        key.encode(&mut self.page.data[offset..offset + K::ENCODED_LEN]);
    }

    pub fn child_index_of(&self, page_id: PageId) -> Option<usize> {
        InternalView::<K>::new(&*self.page).child_index_of(page_id)
    }

    /// Seed a fresh root with two children separated by one key
    pub fn populate_new_root(&mut self, left: PageId, key: K, right: PageId) {
        self.set_entries(&[(K::default(), left), (key, right)]);
    }

    /// Insert (key, child) immediately after the child `after`
    pub fn insert_node_after(&mut self, after: PageId, key: K, child: PageId) {
        let index = self
            .child_index_of(after)
            .expect("split child must be present in its parent");
        let size = self.size();
        let pair = K::ENCODED_LEN + 4;
        let start = internal_pair_offset::<K>(index + 1);
        let end = internal_pair_offset::<K>(size);
        self.page.data.copy_within(start..end, start + pair);
        key.encode(&mut self.page.data[start..start + K::ENCODED_LEN]);
        LittleEndian::write_u32(&mut self.page.data[start + K::ENCODED_LEN..start + pair], child);
        set_node_size(&mut self.page.data, size + 1);
    }

    /// Remove the (key, child) pair at an index >= 1
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index >= 1 && index < size);
        let pair = K::ENCODED_LEN + 4;
        let start = internal_pair_offset::<K>(index);
        let end = internal_pair_offset::<K>(size);
        self.page.data.copy_within(start + pair..end, start);
        set_node_size(&mut self.page.data, size - 1);
    }

    /// Replace the whole pair array; entry 0's key is written as given
    pub fn set_entries(&mut self, entries: &[(K, PageId)]) {
        for (i, (key, child)) in entries.iter().enumerate() {
            let start = internal_pair_offset::<K>(i);
            key.encode(&mut self.page.data[start..start + K::ENCODED_LEN]);
            LittleEndian::write_u32(
                &mut self.page.data[start + K::ENCODED_LEN..start + K::ENCODED_LEN + 4],
                *child,
            );
        }
        set_node_size(&mut self.page.data, entries.len());
    }

    pub fn entries(&self) -> Vec<(K, PageId)> {
        InternalView::<K>::new(&*self.page).entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_insert_ordering() {
        let mut page = Page::new(3);
        let mut leaf = LeafViewMut::<i32>::init(&mut page, 3, 64);
        for key in [40, 10, 30, 20] {
            leaf.insert(key, Rid::new(1, key as u32));
        }
        let view = LeafView::<i32>::new(&page);
        assert_eq!(view.size(), 4);
        let keys: Vec<i32> = (0..4).map(|i| view.key_at(i)).collect();
        assert_eq!(keys, vec![10, 20, 30, 40]);
        assert_eq!(view.lookup(&30), Ok(2));
        assert_eq!(view.lookup(&25), Err(2));
        assert_eq!(view.rid_at(3), Rid::new(1, 40));
    }

    #[test]
    fn test_leaf_remove_shifts_pairs() {
        let mut page = Page::new(3);
        let mut leaf = LeafViewMut::<i32>::init(&mut page, 3, 64);
        for key in [1, 2, 3] {
            leaf.insert(key, Rid::new(9, key as u32));
        }
        leaf.remove_at(1);
        let view = LeafView::<i32>::new(&page);
        assert_eq!(view.size(), 2);
        assert_eq!(view.key_at(0), 1);
        assert_eq!(view.key_at(1), 3);
        assert_eq!(view.rid_at(1), Rid::new(9, 3));
    }

    #[test]
    fn test_internal_lookup_child() {
        let mut page = Page::new(5);
        let mut node = InternalViewMut::<i32>::init(&mut page, 5, 64);
        // children: (<10) -> 100, [10,20) -> 200, [20,..) -> 300
        node.set_entries(&[(0, 100), (10, 200), (20, 300)]);

        let view = InternalView::<i32>::new(&page);
        assert_eq!(view.lookup_child(&5), 100);
        assert_eq!(view.lookup_child(&10), 200);
        assert_eq!(view.lookup_child(&15), 200);
        assert_eq!(view.lookup_child(&20), 300);
        assert_eq!(view.lookup_child(&99), 300);
    }

    #[test]
    fn test_internal_insert_after_and_remove() {
        let mut page = Page::new(5);
        let mut node = InternalViewMut::<i32>::init(&mut page, 5, 64);
        node.set_entries(&[(0, 100), (20, 300)]);
        node.insert_node_after(100, 10, 200);

        let view = InternalView::<i32>::new(&page);
        assert_eq!(view.size(), 3);
        assert_eq!(view.child_at(0), 100);
        assert_eq!(view.key_at(1), 10);
        assert_eq!(view.child_at(1), 200);
        assert_eq!(view.key_at(2), 20);
        assert_eq!(view.child_at(2), 300);

        let mut node = InternalViewMut::<i32>::new(&mut page);
        node.remove_at(1);
        let view = InternalView::<i32>::new(&page);
        assert_eq!(view.size(), 2);
        assert_eq!(view.child_at(1), 300);
        assert_eq!(view.key_at(1), 20);
    }

    #[test]
    fn test_header_fields_roundtrip() {
        let mut page = Page::new(11);
        LeafViewMut::<i64>::init(&mut page, 11, 32);
        set_parent_page_id(&mut page.data, 4);
        set_next_leaf_page_id(&mut page.data, 12);

        assert_eq!(page_type(&page.data), BTreePageType::Leaf);
        assert_eq!(node_page_id(&page.data), 11);
        assert_eq!(node_max_size(&page.data), 32);
        assert_eq!(parent_page_id(&page.data), 4);
        assert_eq!(next_leaf_page_id(&page.data), 12);
    }
}
