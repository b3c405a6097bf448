use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{RecordLocation, HEADER_SIZE, SLOT_SIZE};

/// PageManager interprets a raw page as a slotted record page: header, then
/// record data growing forward, then a slot array growing backward from the
/// page tail. Deleted records are tombstoned in place (slot length zero);
/// space is not compacted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageManager;

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    /// Lay down a fresh header on an empty page
    pub fn init_page(&self, page: &mut Page) {
        let header = PageHeader::new();
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: &PageHeader) {
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: PageId) {
        let mut header = self.get_header(page);
        header.next_page_id = next;
        self.set_header(page, &header);
    }

    pub fn set_prev_page_id(&self, page: &mut Page, prev: PageId) {
        let mut header = self.get_header(page);
        header.prev_page_id = prev;
        self.set_header(page, &header);
    }

    /// Append a record, returning its slot number
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.get_header(page);

        let record_size = data.len() as u32;
        let total_needed = record_size + SLOT_SIZE as u32;
        if header.free_space_size < total_needed {
            return Err(PageError::InsufficientSpace);
        }

        let slot = header.record_count;
        let slot_pos = Self::slot_position(slot);

        let location = RecordLocation {
            offset: header.free_space_offset,
            length: record_size,
        };

        let start = header.free_space_offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&location.to_bytes());

        header.free_space_offset += record_size;
        header.free_space_size -= total_needed;
        header.record_count += 1;
        self.set_header(page, &header);

        Ok(slot)
    }

    /// Read a record by slot. Tombstoned slots come back as None.
    pub fn get_record(&self, page: &Page, slot: u32) -> Result<Option<Vec<u8>>, PageError> {
        let header = self.get_header(page);
        if slot >= header.record_count {
            return Err(PageError::InvalidSlot);
        }

        let location = self.slot_location(page, slot);
        if location.is_tombstone() {
            return Ok(None);
        }

        let start = location.offset as usize;
        let end = start + location.length as usize;
        Ok(Some(page.data[start..end].to_vec()))
    }

    /// Tombstone a record in place
    pub fn delete_record(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        let header = self.get_header(page);
        if slot >= header.record_count {
            return Err(PageError::InvalidSlot);
        }

        let mut location = self.slot_location(page, slot);
        if location.is_tombstone() {
            return Err(PageError::RecordNotFound);
        }

        location.length = 0;
        let slot_pos = Self::slot_position(slot);
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&location.to_bytes());

        Ok(())
    }

    /// Rewrite a record. Fits in place when the new payload is no larger;
    /// otherwise the record is rewritten at the free-space frontier, leaving
    /// a hole behind.
    pub fn update_record(&self, page: &mut Page, slot: u32, data: &[u8]) -> Result<(), PageError> {
        let mut header = self.get_header(page);
        if slot >= header.record_count {
            return Err(PageError::InvalidSlot);
        }

        let mut location = self.slot_location(page, slot);
        if location.is_tombstone() {
            return Err(PageError::RecordNotFound);
        }

        let new_size = data.len() as u32;
        if new_size <= location.length {
            let start = location.offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            location.length = new_size;
        } else {
            if header.free_space_size < new_size {
                return Err(PageError::InsufficientSpace);
            }
            let start = header.free_space_offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            location.offset = header.free_space_offset;
            location.length = new_size;
            header.free_space_offset += new_size;
            header.free_space_size -= new_size;
            self.set_header(page, &header);
        }

        let slot_pos = Self::slot_position(slot);
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&location.to_bytes());

        Ok(())
    }

    pub fn record_count(&self, page: &Page) -> u32 {
        self.get_header(page).record_count
    }

    fn slot_location(&self, page: &Page, slot: u32) -> RecordLocation {
        let slot_pos = Self::slot_position(slot);
        RecordLocation::from_bytes(&page.data[slot_pos..slot_pos + SLOT_SIZE])
    }

    fn slot_position(slot: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    fn fresh_page() -> (PageManager, Page) {
        let manager = PageManager::new();
        let mut page = Page::new(1);
        manager.init_page(&mut page);
        (manager, page)
    }

    #[test]
    fn test_insert_and_get() {
        let (manager, mut page) = fresh_page();
        let slot = manager.insert_record(&mut page, b"first").unwrap();
        assert_eq!(slot, 0);
        let slot = manager.insert_record(&mut page, b"second").unwrap();
        assert_eq!(slot, 1);

        assert_eq!(manager.get_record(&page, 0).unwrap().unwrap(), b"first");
        assert_eq!(manager.get_record(&page, 1).unwrap().unwrap(), b"second");
        assert_eq!(manager.get_record(&page, 2), Err(PageError::InvalidSlot));
    }

    #[test]
    fn test_delete_tombstones_slot() {
        let (manager, mut page) = fresh_page();
        manager.insert_record(&mut page, b"doomed").unwrap();
        manager.delete_record(&mut page, 0).unwrap();

        assert_eq!(manager.get_record(&page, 0).unwrap(), None);
        assert_eq!(
            manager.delete_record(&mut page, 0),
            Err(PageError::RecordNotFound)
        );
        // Slot numbering is stable across deletions
        let slot = manager.insert_record(&mut page, b"next").unwrap();
        assert_eq!(slot, 1);
    }

    #[test]
    fn test_update_in_place_and_relocated() {
        let (manager, mut page) = fresh_page();
        manager.insert_record(&mut page, b"abcdef").unwrap();

        manager.update_record(&mut page, 0, b"xyz").unwrap();
        assert_eq!(manager.get_record(&page, 0).unwrap().unwrap(), b"xyz");

        manager
            .update_record(&mut page, 0, b"a much longer payload")
            .unwrap();
        assert_eq!(
            manager.get_record(&page, 0).unwrap().unwrap(),
            b"a much longer payload"
        );
    }

    #[test]
    fn test_insert_until_full() {
        let (manager, mut page) = fresh_page();
        let payload = [7u8; 128];
        let mut inserted = 0;
        loop {
            match manager.insert_record(&mut page, &payload) {
                Ok(_) => inserted += 1,
                Err(PageError::InsufficientSpace) => break,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert!(inserted > 0);
        assert_eq!(manager.record_count(&page), inserted);
    }

    #[test]
    fn test_page_chain_links() {
        let (manager, mut page) = fresh_page();
        assert_eq!(manager.get_header(&page).next_page_id, INVALID_PAGE_ID);
        manager.set_next_page_id(&mut page, 7);
        manager.set_prev_page_id(&mut page, 3);
        let header = manager.get_header(&page);
        assert_eq!(header.next_page_id, 7);
        assert_eq!(header.prev_page_id, 3);
    }
}
