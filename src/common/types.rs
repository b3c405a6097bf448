use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel page id meaning "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Page id of the header page that stores (index name, root page id) records
pub const HEADER_PAGE_ID: PageId = 0;

/// Transaction ID type; ids are assigned monotonically, a larger id is a
/// younger transaction
pub type TxnId = u32;

/// Sentinel transaction id
pub const INVALID_TXN_ID: TxnId = u32::MAX;

/// Table OID type
pub type TableOid = u32;

/// Index OID type
pub type IndexOid = u32;

/// Buffer pool frame ID type; frame ids live in [0, pool_size)
pub type FrameId = usize;

/// LSN (Log Sequence Number) type, sized to the on-page header slot
pub type Lsn = u32;

/// Record ID: the (page id, slot) pair locating a tuple in a table heap.
/// Opaque to the index layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    /// Width of the fixed on-page encoding
    pub const ENCODED_LEN: usize = 8;

    /// Sentinel rid for executors that emit synthetic tuples
    pub const INVALID: Rid = Rid {
        page_id: INVALID_PAGE_ID,
        slot: 0,
    };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_u32(&buf[0..4]),
            slot: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Page structure: a fixed-size byte buffer plus identity bookkeeping. Pin
/// count and dirty flag live on the owning frame, not here.
#[derive(Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the buffer and drop the identity, returning the page to the
    /// state a fresh frame starts in.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id)
            .field("lsn", &self.lsn)
            .finish()
    }
}

/// Smart pointer to a page; the embedded RwLock is the page latch. A page
/// handed out by the buffer pool is pinned but unlatched.
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read guard over a page latch, usable across loop iterations
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write guard over a page latch
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// Buffer pool frame: one slot of the pool, holding one page plus the pin
/// and dirty bookkeeping the pool mutex guards.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            pin_count: 0,
            is_dirty: false,
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
