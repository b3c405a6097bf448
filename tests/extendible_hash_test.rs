use rookdb::ExtendibleHashTable;

/// With bucket size 2 the keys 4, 12 and 16 all land in bucket zero and
/// force three successive splits before the third insert fits.
#[test]
fn test_directory_growth() {
    let table: ExtendibleHashTable<i64, i64> = ExtendibleHashTable::new(2);

    table.insert(4, 40);
    table.insert(12, 120);
    assert_eq!(table.global_depth(), 0);
    assert_eq!(table.num_buckets(), 1);

    table.insert(16, 160);
    assert_eq!(table.global_depth(), 3);
    assert_eq!(table.num_buckets(), 4);

    assert_eq!(table.get(&4), Some(40));
    assert_eq!(table.get(&12), Some(120));
    assert_eq!(table.get(&16), Some(160));
}

#[test]
fn test_many_keys_stay_reachable() {
    let table: ExtendibleHashTable<i64, i64> = ExtendibleHashTable::new(3);
    for key in 0..256 {
        table.insert(key, key * 2);
    }
    assert_eq!(table.len(), 256);
    for key in 0..256 {
        assert_eq!(table.get(&key), Some(key * 2));
    }

    for key in (0..256).step_by(2) {
        assert!(table.remove(&key));
    }
    assert_eq!(table.len(), 128);
    assert_eq!(table.get(&4), None);
    assert_eq!(table.get(&5), Some(10));
}

#[test]
fn test_string_keys() {
    let table: ExtendibleHashTable<String, u32> = ExtendibleHashTable::new(2);
    for i in 0..50u32 {
        table.insert(format!("table_{i}"), i);
    }
    for i in 0..50u32 {
        assert_eq!(table.get(&format!("table_{i}")), Some(i));
    }
    assert!(table.remove(&"table_7".to_string()));
    assert_eq!(table.get(&"table_7".to_string()), None);
}
