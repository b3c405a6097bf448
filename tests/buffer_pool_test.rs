use anyhow::Result;
use rand::{Rng, SeedableRng};

mod common;
use common::create_test_buffer_pool;

use rookdb::common::types::PAGE_SIZE;
use rookdb::storage::buffer::BufferPoolError;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(10, 5)?;

    let (page_id, page) = buffer_pool.new_page()?;
    assert!(page_id > 0); // page 0 is the header page

    {
        let guard = page.read();
        assert_eq!(guard.page_id, page_id);
        assert!(guard.data.iter().all(|&b| b == 0));
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_unpin_twice_fails() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(10, 5)?;

    let (page_id, _page) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(99_999, false));
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(3, 2)?;

    let (page_id, page) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[100..105].copy_from_slice(b"hello");
    }
    assert!(buffer_pool.unpin_page(page_id, true));

    // Cycle enough pages through the pool to evict the dirty page
    for _ in 0..6 {
        let (other_id, _) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(other_id, false);
    }

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let guard = fetched.read();
        assert_eq!(&guard.data[100..105], b"hello");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_flush_page_clears_dirty() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(10, 5)?;

    let (page_id, page) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[0..4].copy_from_slice(b"data");
    }
    buffer_pool.unpin_page(page_id, true);

    assert!(buffer_pool.flush_page(page_id)?);
    assert!(!buffer_pool.flush_page(424_242)?);
    Ok(())
}

#[test]
fn test_delete_page_recycles_frame() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(10, 5)?;

    let (page_id, _page) = buffer_pool.new_page()?;

    // Pinned pages cannot be deleted
    assert!(!buffer_pool.delete_page(page_id)?);
    buffer_pool.unpin_page(page_id, true);
    assert!(buffer_pool.delete_page(page_id)?);

    // Deleting a non-resident page succeeds
    assert!(buffer_pool.delete_page(page_id)?);

    // The old id reads back as a fresh blank page
    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let guard = fetched.read();
        assert!(guard.data.iter().all(|&b| b == 0));
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

/// Binary round-trip through a full pool: pool size 10, K = 5, one page of
/// random bytes (embedded NULs included) written, evicted and re-fetched.
#[test]
fn test_binary_data_roundtrip_under_pressure() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(10, 5)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xDB_CAFE);

    let mut random_data = [0u8; PAGE_SIZE];
    rng.fill(&mut random_data[..]);
    // embedded terminators must not matter
    random_data[PAGE_SIZE / 2] = 0;
    random_data[PAGE_SIZE - 1] = 0;

    let (first_id, first_page) = buffer_pool.new_page()?;
    {
        let mut guard = first_page.write();
        guard.data.copy_from_slice(&random_data);
    }

    // Fill the rest of the pool
    let mut page_ids = vec![first_id];
    for _ in 0..9 {
        let (page_id, _) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    // Every frame is pinned: no page can be created or fetched in
    for _ in 0..10 {
        assert!(matches!(
            buffer_pool.new_page(),
            Err(BufferPoolError::BufferPoolFull)
        ));
    }

    // Free five frames, then push five more pages through them
    for &page_id in page_ids.iter().take(5) {
        assert!(buffer_pool.unpin_page(page_id, true));
    }
    for _ in 0..5 {
        let (page_id, _) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(page_id, false));
    }

    // The first page was evicted dirty; its bytes must come back intact
    let fetched = buffer_pool.fetch_page(first_id)?;
    {
        let guard = fetched.read();
        assert_eq!(guard.data, random_data);
    }
    buffer_pool.unpin_page(first_id, false);
    Ok(())
}

#[test]
fn test_fetch_fails_only_when_all_pinned() -> Result<()> {
    let (buffer_pool, _db_file) = create_test_buffer_pool(3, 2)?;

    let (evicted_id, _) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(evicted_id, false);

    let mut pinned = Vec::new();
    for _ in 0..3 {
        let (page_id, _) = buffer_pool.new_page()?;
        pinned.push(page_id);
    }

    // All frames pinned: a non-resident page cannot be brought in
    assert!(matches!(
        buffer_pool.fetch_page(evicted_id),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // A resident page can still be re-pinned
    let again = buffer_pool.fetch_page(pinned[0])?;
    {
        let guard = again.read();
        assert_eq!(guard.page_id, pinned[0]);
    }
    buffer_pool.unpin_page(pinned[0], false);

    buffer_pool.unpin_page(pinned[0], false);
    assert!(buffer_pool.fetch_page(evicted_id).is_ok());
    Ok(())
}
