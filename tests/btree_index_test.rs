use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use rookdb::common::types::Rid;
use rookdb::index::btree::BPlusTree;
use rookdb::storage::buffer::BufferPoolManager;
use tempfile::NamedTempFile;

fn create_test_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(Arc<BPlusTree<i64>>, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, db_file) = create_test_buffer_pool(pool_size, 2)?;
    let tree = Arc::new(BPlusTree::<i64>::new(
        "test_index",
        Arc::clone(&buffer_pool),
        leaf_max,
        internal_max,
    )?);
    Ok((tree, buffer_pool, db_file))
}

fn rid_for(key: i64) -> Rid {
    Rid::new(1, key as u32)
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(50, 4, 4)?;
    assert!(tree.is_empty());

    let keys: Vec<i64> = vec![
        37, 2, 19, 44, 8, 61, 23, 5, 50, 12, 31, 76, 1, 90, 28, 67, 14, 3, 55, 40,
    ];
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key))?);
        tree.check_integrity()?;
    }
    assert!(!tree.is_empty());

    for &key in &keys {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get(&1000)?, None);
    Ok(())
}

#[test]
fn test_duplicate_insert_is_rejected() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(50, 4, 4)?;
    assert!(tree.insert(7, rid_for(7))?);
    assert!(!tree.insert(7, Rid::new(9, 9))?);
    // the original value is untouched
    assert_eq!(tree.get(&7)?, Some(rid_for(7)));
    Ok(())
}

#[test]
fn test_remove_absent_is_silent() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(50, 4, 4)?;
    tree.remove(&3)?; // empty tree
    tree.insert(1, rid_for(1))?;
    tree.remove(&3)?; // key not present
    assert_eq!(tree.get(&1)?, Some(rid_for(1)));
    Ok(())
}

/// Deletion rebalance walkthrough with max size 4 on both node types:
/// inserts split, removals redistribute, coalesce and finally drain the
/// tree back to empty.
#[test]
fn test_delete_rebalance_sequence() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(50, 4, 4)?;

    let inserts: Vec<i64> = vec![2, 4, 15, 3, 7, 16, 18, 22, 20, 25, 11, 13];
    for &key in &inserts {
        assert!(tree.insert(key, rid_for(key))?);
        tree.check_integrity()?;
    }

    for &key in &[15, 16] {
        tree.remove(&key)?;
        tree.check_integrity()?;
    }
    for &key in &[8, 26] {
        assert!(tree.insert(key, rid_for(key))?);
        tree.check_integrity()?;
    }

    // no underflow
    tree.remove(&4)?;
    tree.check_integrity()?;
    // underflow resolved by redistribution
    tree.remove(&20)?;
    tree.check_integrity()?;
    // underflow resolved by coalescing, changing the parent separator
    tree.remove(&7)?;
    tree.check_integrity()?;

    let mut remaining: HashSet<i64> = inserts.into_iter().collect();
    for key in [15, 16, 4, 20, 7] {
        remaining.remove(&key);
    }
    remaining.extend([8, 26]);

    for &key in &remaining.clone() {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }

    for key in remaining {
        tree.remove(&key)?;
        tree.check_integrity()?;
    }
    assert!(tree.is_empty());
    assert_eq!(tree.get(&2)?, None);
    Ok(())
}

#[test]
fn test_tree_is_reusable_after_draining() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(50, 4, 4)?;

    for key in 0..20 {
        tree.insert(key, rid_for(key))?;
    }
    for key in 0..20 {
        tree.remove(&key)?;
    }
    assert!(tree.is_empty());

    for key in 100..120 {
        tree.insert(key, rid_for(key))?;
    }
    tree.check_integrity()?;
    assert_eq!(tree.get(&110)?, Some(rid_for(110)));
    Ok(())
}

#[test]
fn test_iterator_full_scan_in_order() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(64, 5, 5)?;

    // shuffled insert order
    let mut keys: Vec<i64> = (0..100).map(|i| (i * 37) % 100).collect();
    keys.dedup();
    for &key in &keys {
        tree.insert(key, rid_for(key))?;
    }

    let collected: Result<Vec<(i64, Rid)>, _> = tree.iter()?.collect();
    let collected = collected?;
    let scanned: Vec<i64> = collected.iter().map(|&(k, _)| k).collect();
    let expected: Vec<i64> = (0..100).collect();
    assert_eq!(scanned, expected);
    Ok(())
}

#[test]
fn test_iterator_from_key() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(64, 5, 5)?;
    for key in (0..50).map(|i| i * 2) {
        tree.insert(key, rid_for(key))?;
    }

    // start key present
    let from_40: Result<Vec<(i64, Rid)>, _> = tree.iter_from(&40)?.collect();
    let keys: Vec<i64> = from_40?.iter().map(|&(k, _)| k).collect();
    assert_eq!(keys, (20..50).map(|i| i * 2).collect::<Vec<i64>>());

    // start key absent: iteration begins at the next larger key
    let from_41: Result<Vec<(i64, Rid)>, _> = tree.iter_from(&41)?.collect();
    let keys: Vec<i64> = from_41?.iter().map(|&(k, _)| k).collect();
    assert_eq!(keys, (21..50).map(|i| i * 2).collect::<Vec<i64>>());

    // start key beyond the last entry
    let from_999: Result<Vec<(i64, Rid)>, _> = tree.iter_from(&999)?.collect();
    assert!(from_999?.is_empty());
    Ok(())
}

#[test]
fn test_concurrent_insert_and_get() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(256, 6, 6)?;

    let threads = 4;
    let per_thread = 200i64;
    let mut handles = Vec::new();
    for t in 0..threads {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let key = t as i64 * per_thread + i;
                tree.insert(key, rid_for(key)).unwrap();
                assert_eq!(tree.get(&key).unwrap(), Some(rid_for(key)));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.check_integrity()?;
    for key in 0..threads as i64 * per_thread {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_mixed_workload() -> Result<()> {
    let (tree, _pool, _db_file) = create_test_tree(256, 6, 6)?;

    // pre-populate evens; they are never removed
    for key in (0..800).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }
    // odds get inserted and removed concurrently with reads of the evens
    let mut handles = Vec::new();
    for t in 0..4i64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let odd = 1 + 2 * (t * 100 + i);
                tree.insert(odd, rid_for(odd)).unwrap();
                let probe = 2 * ((t * 100 + i) % 400);
                assert_eq!(tree.get(&probe).unwrap(), Some(rid_for(probe)));
                tree.remove(&odd).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.check_integrity()?;
    // every key inserted once and never removed is still present
    for key in (0..800).step_by(2) {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    // all odds were removed by their writers
    for key in (1..800).step_by(2) {
        assert_eq!(tree.get(&key)?, None);
    }
    Ok(())
}
