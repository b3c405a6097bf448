use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::layout::HEADER_SIZE;

/// Heap page header. Record data grows from just past the header; the slot
/// array grows backward from the end of the page. The next/prev links chain
/// the pages of one table heap.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub free_space_offset: u32,
    pub free_space_size: u32,
    pub record_count: u32,
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageHeader {
    pub fn new() -> Self {
        Self {
            free_space_offset: HEADER_SIZE as u32,
            free_space_size: (PAGE_SIZE - HEADER_SIZE) as u32,
            record_count: 0,
            next_page_id: INVALID_PAGE_ID,
            prev_page_id: INVALID_PAGE_ID,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.free_space_offset);
        LittleEndian::write_u32(&mut bytes[4..8], self.free_space_size);
        LittleEndian::write_u32(&mut bytes[8..12], self.record_count);
        LittleEndian::write_u32(&mut bytes[12..16], self.next_page_id);
        LittleEndian::write_u32(&mut bytes[16..20], self.prev_page_id);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            free_space_offset: LittleEndian::read_u32(&bytes[0..4]),
            free_space_size: LittleEndian::read_u32(&bytes[4..8]),
            record_count: LittleEndian::read_u32(&bytes[8..12]),
            next_page_id: LittleEndian::read_u32(&bytes[12..16]),
            prev_page_id: LittleEndian::read_u32(&bytes[16..20]),
        }
    }
}
