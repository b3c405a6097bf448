use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::common::types::{Frame, FrameId, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Pool state guarded by the single pool-wide mutex: frame metadata, the
/// page table, the free list and the replacer. Page *content* is reached
/// through each frame's page latch, never through this mutex.
struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
}

/// BufferPoolManager serves page-id requests out of a fixed pool of frames,
/// delegating page I/O to the disk manager and eviction decisions to the
/// LRU-K replacer.
pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it in a frame. The returned page is
    /// zeroed, pinned once and unlatched. Errors with `BufferPoolFull` when
    /// every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.allocate_frame(&mut inner)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        {
            let frame = &mut inner.frames[frame_id];
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
            frame.pin_count = 1;
            frame.is_dirty = false;
        }

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok((page_id, inner.frames[frame_id].page.clone()))
    }

    /// Fetch a page, reading it from disk if it is not resident. Errors with
    /// `BufferPoolFull` when it is absent and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            inner.frames[frame_id].pin_count += 1;
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Ok(inner.frames[frame_id].page.clone());
        }

        let frame_id = self.allocate_frame(&mut inner)?;

        {
            let frame = &mut inner.frames[frame_id];
            let read_result = {
                let mut page = frame.page.write();
                self.disk_manager.read_page(page_id, &mut page)
            };
            if let Err(e) = read_result {
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
            let frame = &mut inner.frames[frame_id];
            frame.pin_count = 1;
            frame.is_dirty = false;
        }

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(inner.frames[frame_id].page.clone())
    }

    /// Drop one pin on a page, ORing in the dirty flag. When the pin count
    /// reaches zero the frame becomes evictable. Returns false if the page
    /// is not resident or was not pinned. Never writes to disk itself.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }

        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }

        true
    }

    /// Write a resident page to disk and clear its dirty flag, regardless of
    /// pin count. Returns false only when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };

        {
            let frame = &inner.frames[frame_id];
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
        }
        inner.frames[frame_id].is_dirty = false;

        Ok(true)
    }

    /// Flush every resident page
    pub fn flush_all(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_ids: Vec<FrameId> = inner.page_table.values().copied().collect();
        for frame_id in frame_ids {
            {
                let frame = &inner.frames[frame_id];
                let page = frame.page.read();
                self.disk_manager.write_page(&page)?;
            }
            inner.frames[frame_id].is_dirty = false;
        }

        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk. Returns false if
    /// the page is resident and pinned. Dirty contents are discarded, not
    /// flushed: the page id is being recycled.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            self.disk_manager.deallocate_page(page_id);
            return Ok(true);
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        {
            let frame = &mut inner.frames[frame_id];
            frame.is_dirty = false;
            frame.page.write().reset();
        }
        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(true)
    }

    /// Pick a frame for reuse: free list first, then an eviction victim.
    /// A dirty victim is written back before the frame is handed out.
    fn allocate_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = inner.replacer.evict() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let old_page_id;
        {
            let frame = &inner.frames[frame_id];
            let page = frame.page.read();
            old_page_id = page.page_id;
            if frame.is_dirty && old_page_id != INVALID_PAGE_ID {
                self.disk_manager.write_page(&page)?;
            }
        }
        inner.frames[frame_id].is_dirty = false;

        if old_page_id != INVALID_PAGE_ID {
            trace!("evicting page {} from frame {}", old_page_id, frame_id);
            inner.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}
