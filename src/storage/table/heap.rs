use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};
use crate::storage::table::tuple::Tuple;

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Tuple codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// TableHeap stores a table's tuples in a forward-chained list of slotted
/// heap pages fetched through the buffer pool. Deletes tombstone in place,
/// so rids stay stable for the life of the heap.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Create a heap with one empty page
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, TableHeapError> {
        let page_manager = PageManager::new();
        let (first_page_id, page) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            page_manager.init_page(&mut guard);
        }
        buffer_pool.unpin_page(first_page_id, true);

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, appending a fresh page when the tail page is full
    pub fn insert_tuple(&self, tuple: &Tuple) -> Result<Rid, TableHeapError> {
        let data = tuple.to_bytes()?;
        let mut last_page_id = self.last_page_id.lock();

        let mut page_id = *last_page_id;
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let result = {
                let mut guard = page.write();
                self.page_manager.insert_record(&mut guard, &data)
            };

            match result {
                Ok(slot) => {
                    self.buffer_pool.unpin_page(page_id, true);
                    return Ok(Rid::new(page_id, slot));
                }
                Err(PageError::InsufficientSpace) => {
                    let (next_page_id, next_page) = self.buffer_pool.new_page()?;
                    {
                        let mut next_guard = next_page.write();
                        self.page_manager.init_page(&mut next_guard);
                        self.page_manager.set_prev_page_id(&mut next_guard, page_id);
                    }
                    {
                        let mut guard = page.write();
                        self.page_manager.set_next_page_id(&mut guard, next_page_id);
                    }
                    self.buffer_pool.unpin_page(page_id, true);
                    self.buffer_pool.unpin_page(next_page_id, true);
                    *last_page_id = next_page_id;
                    page_id = next_page_id;
                }
                Err(e) => {
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            }
        }
    }

    /// Read a tuple by rid; None for tombstoned slots
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>, TableHeapError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let record = {
            let guard = page.read();
            self.page_manager.get_record(&guard, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, false);

        match record? {
            Some(bytes) => Ok(Some(Tuple::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Rewrite the tuple at a rid. Returns false when the slot is tombstoned.
    pub fn update_tuple(&self, rid: Rid, tuple: &Tuple) -> Result<bool, TableHeapError> {
        let data = tuple.to_bytes()?;
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut guard = page.write();
            self.page_manager.update_record(&mut guard, rid.slot, &data)
        };

        match result {
            Ok(()) => {
                self.buffer_pool.unpin_page(rid.page_id, true);
                Ok(true)
            }
            Err(PageError::RecordNotFound) => {
                self.buffer_pool.unpin_page(rid.page_id, false);
                Ok(false)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false);
                Err(e.into())
            }
        }
    }

    /// Tombstone the tuple at a rid. Returns false when already deleted.
    pub fn mark_delete(&self, rid: Rid) -> Result<bool, TableHeapError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut guard = page.write();
            self.page_manager.delete_record(&mut guard, rid.slot)
        };

        match result {
            Ok(()) => {
                self.buffer_pool.unpin_page(rid.page_id, true);
                Ok(true)
            }
            Err(PageError::RecordNotFound) => {
                self.buffer_pool.unpin_page(rid.page_id, false);
                Ok(false)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false);
                Err(e.into())
            }
        }
    }

    /// Iterate the heap's live tuples in (page, slot) order
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator {
            heap: Arc::clone(self),
            current_page_id: self.first_page_id,
            current_slot: 0,
            done: false,
        }
    }
}

/// Forward iterator over a table heap, skipping tombstones. Yields owned
/// tuples so no page stays pinned between calls.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    current_page_id: PageId,
    current_slot: u32,
    done: bool,
}

impl TableIterator {
    pub fn next(&mut self) -> Result<Option<(Tuple, Rid)>, TableHeapError> {
        while !self.done {
            let page = self.heap.buffer_pool.fetch_page(self.current_page_id)?;
            let (record, record_count, next_page_id) = {
                let guard = page.read();
                let header = self.heap.page_manager.get_header(&guard);
                let record = if self.current_slot < header.record_count {
                    self.heap.page_manager.get_record(&guard, self.current_slot)?
                } else {
                    None
                };
                (record, header.record_count, header.next_page_id)
            };
            self.heap.buffer_pool.unpin_page(self.current_page_id, false);

            if self.current_slot >= record_count {
                if next_page_id == INVALID_PAGE_ID {
                    self.done = true;
                    return Ok(None);
                }
                self.current_page_id = next_page_id;
                self.current_slot = 0;
                continue;
            }

            let rid = Rid::new(self.current_page_id, self.current_slot);
            self.current_slot += 1;

            if let Some(bytes) = record {
                return Ok(Some((Tuple::from_bytes(&bytes)?, rid)));
            }
            // tombstone: advance to the next slot
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::value::DataValue;
    use tempfile::NamedTempFile;

    fn test_heap() -> (Arc<TableHeap>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let buffer_pool = Arc::new(BufferPoolManager::new(16, 2, file.path()).unwrap());
        let heap = Arc::new(TableHeap::new(buffer_pool).unwrap());
        (heap, file)
    }

    fn row(id: i64) -> Tuple {
        Tuple::new(vec![
            DataValue::Integer(id),
            DataValue::Text(format!("row-{id}")),
        ])
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let (heap, _file) = test_heap();
        let rid = heap.insert_tuple(&row(7)).unwrap();
        let fetched = heap.get_tuple(rid).unwrap().unwrap();
        assert_eq!(fetched, row(7));
    }

    #[test]
    fn test_mark_delete_hides_tuple() {
        let (heap, _file) = test_heap();
        let rid = heap.insert_tuple(&row(1)).unwrap();
        assert!(heap.mark_delete(rid).unwrap());
        assert_eq!(heap.get_tuple(rid).unwrap(), None);
        assert!(!heap.mark_delete(rid).unwrap());
    }

    #[test]
    fn test_update_tuple() {
        let (heap, _file) = test_heap();
        let rid = heap.insert_tuple(&row(1)).unwrap();
        assert!(heap.update_tuple(rid, &row(99)).unwrap());
        assert_eq!(heap.get_tuple(rid).unwrap().unwrap(), row(99));
    }

    #[test]
    fn test_iterator_spans_pages_and_skips_tombstones() {
        let (heap, _file) = test_heap();
        let mut rids = Vec::new();
        // Enough rows to overflow one 4 KiB page
        for id in 0..200 {
            rids.push(heap.insert_tuple(&row(id)).unwrap());
        }
        heap.mark_delete(rids[10]).unwrap();
        heap.mark_delete(rids[150]).unwrap();

        let mut iter = heap.iter();
        let mut seen = Vec::new();
        while let Some((tuple, _rid)) = iter.next().unwrap() {
            match tuple.value(0) {
                DataValue::Integer(id) => seen.push(*id),
                other => panic!("unexpected value {other:?}"),
            }
        }
        assert_eq!(seen.len(), 198);
        assert!(!seen.contains(&10));
        assert!(!seen.contains(&150));
        // Insertion order is preserved
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }
}
