use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageReadGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::LeafView;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the leaf level. The current leaf stays read-latched
/// and pinned between calls; advancing latches the successor leaf before the
/// predecessor's latch is dropped.
pub struct BPlusTreeIter<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    guard: Option<PageReadGuard>,
    index: usize,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTreeIter<K> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        guard: PageReadGuard,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            guard: Some(guard),
            index,
            _marker: PhantomData,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            guard: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    fn release_current(&mut self) {
        if let Some(guard) = self.guard.take() {
            let page_id = guard.page_id;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
        }
    }
}

impl<K: IndexKey> Iterator for BPlusTreeIter<K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.guard.as_ref()?;
            let view = LeafView::<K>::new(guard);

            if self.index < view.size() {
                let item = (view.key_at(self.index), view.rid_at(self.index));
                self.index += 1;
                return Some(Ok(item));
            }

            let next_id = view.next_leaf();
            if next_id == INVALID_PAGE_ID {
                self.release_current();
                return None;
            }

            // Latch the successor before releasing the current leaf
            let next_page = match self.buffer_pool.fetch_page(next_id) {
                Ok(page) => page,
                Err(e) => {
                    self.release_current();
                    return Some(Err(e.into()));
                }
            };
            let next_guard = next_page.read_arc();
            self.release_current();
            self.guard = Some(next_guard);
            self.index = 0;
        }
    }
}

impl<K: IndexKey> Drop for BPlusTreeIter<K> {
    fn drop(&mut self) {
        self.release_current();
    }
}
