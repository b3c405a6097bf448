use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::schema::Schema;
use crate::common::types::{IndexOid, TableOid};
use crate::index::btree::{BPlusTree, BTreeError};
use crate::index::hash::ExtendibleHashTable;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{TableHeap, TableHeapError};

/// Bucket size for the catalog's in-memory name indexes
const NAME_INDEX_BUCKET_SIZE: usize = 8;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table {0} already exists")]
    TableAlreadyExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Index {0} already exists")]
    IndexAlreadyExists(String),

    #[error("Index key column {0} out of range")]
    KeyColumnOutOfRange(usize),

    #[error("Table heap error: {0}")]
    TableHeap(#[from] TableHeapError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

/// A table known to the catalog: schema plus its heap
pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// An index known to the catalog: the B+ tree plus the column it keys on.
/// Keys are the integer value of that column.
pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    pub key_column: usize,
    pub index: Arc<BPlusTree<i64>>,
}

/// The catalog maps names and oids to tables and indexes. Name lookups go
/// through in-memory extendible hash tables.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    tables: HashMap<TableOid, Arc<TableInfo>>,
    indexes: HashMap<IndexOid, Arc<IndexInfo>>,
    table_names: ExtendibleHashTable<String, TableOid>,
    index_names: ExtendibleHashTable<String, IndexOid>,
    table_indexes: HashMap<String, Vec<IndexOid>>,
    next_table_oid: TableOid,
    next_index_oid: IndexOid,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            tables: HashMap::new(),
            indexes: HashMap::new(),
            table_names: ExtendibleHashTable::new(NAME_INDEX_BUCKET_SIZE),
            index_names: ExtendibleHashTable::new(NAME_INDEX_BUCKET_SIZE),
            table_indexes: HashMap::new(),
            next_table_oid: 0,
            next_index_oid: 0,
        }
    }

    pub fn create_table(
        &mut self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let name = name.into();
        if self.table_names.get(&name).is_some() {
            return Err(CatalogError::TableAlreadyExists(name));
        }

        let oid = self.next_table_oid;
        self.next_table_oid += 1;

        let heap = Arc::new(TableHeap::new(Arc::clone(&self.buffer_pool))?);
        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema,
            heap,
        });

        self.tables.insert(oid, Arc::clone(&info));
        self.table_names.insert(name.clone(), oid);
        self.table_indexes.entry(name).or_default();
        Ok(info)
    }

    pub fn get_table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.get(&oid).cloned()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let oid = self.table_names.get(&name.to_string())?;
        self.tables.get(&oid).cloned()
    }

    /// Create a B+ tree index over one integer column of a table
    pub fn create_index(
        &mut self,
        index_name: impl Into<String>,
        table_name: &str,
        key_column: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let index_name = index_name.into();
        if self.index_names.get(&index_name).is_some() {
            return Err(CatalogError::IndexAlreadyExists(index_name));
        }
        let table = self
            .get_table_by_name(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;
        if key_column >= table.schema.len() {
            return Err(CatalogError::KeyColumnOutOfRange(key_column));
        }

        let oid = self.next_index_oid;
        self.next_index_oid += 1;

        let index = Arc::new(BPlusTree::new(
            index_name.clone(),
            Arc::clone(&self.buffer_pool),
            leaf_max_size,
            internal_max_size,
        )?);
        let info = Arc::new(IndexInfo {
            oid,
            name: index_name.clone(),
            table_name: table_name.to_string(),
            key_column,
            index,
        });

        self.indexes.insert(oid, Arc::clone(&info));
        self.index_names.insert(index_name, oid);
        self.table_indexes
            .entry(table_name.to_string())
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn get_index(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.indexes.get(&oid).cloned()
    }

    pub fn get_index_by_name(&self, name: &str) -> Option<Arc<IndexInfo>> {
        let oid = self.index_names.get(&name.to_string())?;
        self.indexes.get(&oid).cloned()
    }

    /// Every index declared over a table
    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.table_indexes
            .get(table_name)
            .map(|oids| {
                oids.iter()
                    .filter_map(|oid| self.indexes.get(oid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
