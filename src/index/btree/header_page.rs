//! The header page (page id 0) stores one (index name, root page id) record
//! per index living in the database file. Root transitions are persisted
//! here so an index can be re-opened by name.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_LEN: usize = NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_LEN;

/// Accessor for the header page's record array
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderPage;

impl HeaderPage {
    pub fn new() -> Self {
        Self
    }

    pub fn record_count(&self, page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]) as usize
    }

    /// Root page id recorded under a name, if any
    pub fn get_root_id(&self, page: &Page, name: &str) -> Option<PageId> {
        self.find(page, name)
            .map(|index| self.root_at(page, index))
    }

    /// Record a new (name, root id) pair
    pub fn insert_record(
        &self,
        page: &mut Page,
        name: &str,
        root_id: PageId,
    ) -> Result<(), BTreeError> {
        let encoded = Self::encode_name(name)?;
        if self.find(page, name).is_some() {
            return Ok(());
        }
        let count = self.record_count(page);
        if count >= MAX_RECORDS {
            return Err(BTreeError::HeaderPageFull);
        }

        let offset = Self::record_offset(count);
        page.data[offset..offset + NAME_LEN].copy_from_slice(&encoded);
        LittleEndian::write_u32(&mut page.data[offset + NAME_LEN..offset + RECORD_LEN], root_id);
        LittleEndian::write_u32(
            &mut page.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4],
            (count + 1) as u32,
        );
        Ok(())
    }

    /// Update the root id recorded under a name. Returns false when the
    /// name is unknown.
    pub fn update_record(&self, page: &mut Page, name: &str, root_id: PageId) -> bool {
        let Some(index) = self.find(page, name) else {
            return false;
        };
        let offset = Self::record_offset(index);
        LittleEndian::write_u32(&mut page.data[offset + NAME_LEN..offset + RECORD_LEN], root_id);
        true
    }

    fn find(&self, page: &Page, name: &str) -> Option<usize> {
        let encoded = Self::encode_name(name).ok()?;
        (0..self.record_count(page)).find(|&index| {
            let offset = Self::record_offset(index);
            page.data[offset..offset + NAME_LEN] == encoded
        })
    }

    fn root_at(&self, page: &Page, index: usize) -> PageId {
        let offset = Self::record_offset(index);
        LittleEndian::read_u32(&page.data[offset + NAME_LEN..offset + RECORD_LEN])
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_LEN
    }

    fn encode_name(name: &str) -> Result<[u8; NAME_LEN], BTreeError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NAME_LEN {
            return Err(BTreeError::IndexNameTooLong(name.to_string()));
        }
        let mut encoded = [0u8; NAME_LEN];
        encoded[..bytes.len()].copy_from_slice(bytes);
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{HEADER_PAGE_ID, INVALID_PAGE_ID};

    #[test]
    fn test_insert_find_update() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let header = HeaderPage::new();

        assert_eq!(header.get_root_id(&page, "idx_a"), None);
        header.insert_record(&mut page, "idx_a", INVALID_PAGE_ID).unwrap();
        header.insert_record(&mut page, "idx_b", 42).unwrap();

        assert_eq!(header.get_root_id(&page, "idx_a"), Some(INVALID_PAGE_ID));
        assert_eq!(header.get_root_id(&page, "idx_b"), Some(42));
        assert_eq!(header.record_count(&page), 2);

        assert!(header.update_record(&mut page, "idx_a", 7));
        assert_eq!(header.get_root_id(&page, "idx_a"), Some(7));
        assert!(!header.update_record(&mut page, "missing", 1));
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let header = HeaderPage::new();
        header.insert_record(&mut page, "idx", 3).unwrap();
        header.insert_record(&mut page, "idx", 9).unwrap();
        assert_eq!(header.record_count(&page), 1);
        assert_eq!(header.get_root_id(&page, "idx"), Some(3));
    }

    #[test]
    fn test_name_length_limit() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let header = HeaderPage::new();
        let long_name = "x".repeat(64);
        assert!(matches!(
            header.insert_record(&mut page, &long_name, 1),
            Err(BTreeError::IndexNameTooLong(_))
        ));
    }
}
