//! Durable catalog: ties table and index names to their on-disk metadata
//! pages and materializes live heaps and B+-trees for them.

mod meta;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use log::info;

use btree::Index;
use buffer::BufferPool;
use common::{CATALOG_META_PAGE, DbError, DbResult, IndexId, PAGE_SIZE, PageId, TableId};
use record::{Row, Schema};
use storage::TableHeap;

pub use meta::{CATALOG_MAGIC, CatalogMeta, INDEX_META_MAGIC, IndexMetadata, TABLE_META_MAGIC, TableMetadata};

/// A table the catalog has materialized: durable metadata plus its live
/// heap.
pub struct TableInfo {
    pub table_id: TableId,
    pub name: String,
    pub schema: Arc<Schema>,
    pub heap: TableHeap,
}

/// An index the catalog has materialized: durable metadata, the key schema
/// projected from the owning table, and the live tree.
pub struct IndexInfo {
    pub index_id: IndexId,
    pub name: String,
    pub table_id: TableId,
    pub key_map: Vec<u32>,
    pub key_schema: Arc<Schema>,
    pub index: Box<dyn Index>,
}

impl IndexInfo {
    /// Projects a table row down to this index's key columns.
    pub fn key_row(&self, row: &Row) -> DbResult<Row> {
        row.project(&self.key_map)
    }
}

/// Owner of all table and index infos of one database.
pub struct CatalogManager {
    pool: Arc<BufferPool>,
    meta: CatalogMeta,
    tables: HashMap<TableId, TableInfo, RandomState>,
    table_names: HashMap<String, TableId, RandomState>,
    indexes: HashMap<IndexId, IndexInfo, RandomState>,
    next_table_id: u32,
    next_index_id: u32,
}

impl CatalogManager {
    /// Writes an empty catalog to the reserved meta page of a fresh
    /// database file.
    pub fn init(pool: Arc<BufferPool>) -> DbResult<Self> {
        let catalog = Self {
            pool,
            meta: CatalogMeta::default(),
            tables: HashMap::default(),
            table_names: HashMap::default(),
            indexes: HashMap::default(),
            next_table_id: 1,
            next_index_id: 1,
        };
        catalog.flush_meta()?;
        Ok(catalog)
    }

    /// Rehydrates the catalog of an existing database file.
    pub fn open(pool: Arc<BufferPool>) -> DbResult<Self> {
        let meta = {
            let page = pool.fetch(CATALOG_META_PAGE)?;
            let data = page.data();
            CatalogMeta::decode(&mut &data[..])?
        };

        let mut tables = HashMap::default();
        let mut table_names = HashMap::default();
        let mut next_table_id = 1;
        for (&table_id, &meta_page) in &meta.table_meta_pages {
            let record = {
                let page = pool.fetch(meta_page)?;
                let data = page.data();
                TableMetadata::decode(&mut &data[..])?
            };
            if record.table_id != table_id {
                return Err(DbError::CorruptMetadata(format!(
                    "table meta page {meta_page:?} describes table {} instead of {}",
                    record.table_id.0, table_id.0
                )));
            }
            let schema = Arc::new(record.schema);
            let heap = TableHeap::open(Arc::clone(&pool), record.first_page_id, Arc::clone(&schema));
            table_names.insert(record.name.clone(), table_id);
            tables.insert(
                table_id,
                TableInfo {
                    table_id,
                    name: record.name,
                    schema,
                    heap,
                },
            );
            next_table_id = next_table_id.max(table_id.0 + 1);
        }

        let mut indexes = HashMap::default();
        let mut next_index_id = 1;
        for (&index_id, &meta_page) in &meta.index_meta_pages {
            let record = {
                let page = pool.fetch(meta_page)?;
                let data = page.data();
                IndexMetadata::decode(&mut &data[..])?
            };
            let table = tables.get(&record.table_id).ok_or_else(|| {
                DbError::CorruptMetadata(format!(
                    "index '{}' references unknown table {}",
                    record.name, record.table_id.0
                ))
            })?;
            let key_schema = Arc::new(table.schema.project(&record.key_map)?);
            let index = btree::open_index(index_id, Arc::clone(&pool), Arc::clone(&key_schema))?;
            indexes.insert(
                index_id,
                IndexInfo {
                    index_id,
                    name: record.name,
                    table_id: record.table_id,
                    key_map: record.key_map,
                    key_schema,
                    index,
                },
            );
            next_index_id = next_index_id.max(index_id.0 + 1);
        }

        info!(
            "catalog loaded: {} tables, {} indexes",
            tables.len(),
            indexes.len()
        );
        Ok(Self {
            pool,
            meta,
            tables,
            table_names,
            indexes,
            next_table_id,
            next_index_id,
        })
    }

    // ------------------------------------------------------------- tables

    pub fn create_table(&mut self, name: &str, schema: Schema) -> DbResult<TableId> {
        if self.table_names.contains_key(name) {
            return Err(DbError::AlreadyExists(format!("table '{name}'")));
        }
        if schema.is_empty() {
            return Err(DbError::Constraint(
                "table must have at least one column".into(),
            ));
        }

        let schema = Arc::new(schema);
        let heap = TableHeap::create(Arc::clone(&self.pool), Arc::clone(&schema))?;
        let table_id = TableId(self.next_table_id);
        self.next_table_id += 1;

        let record = TableMetadata {
            table_id,
            name: name.to_string(),
            first_page_id: heap.first_page_id(),
            schema: (*schema).clone(),
        };
        let meta_page = self.write_meta_record(|buf| record.encode(buf))?;

        self.meta.table_meta_pages.insert(table_id, meta_page);
        self.table_names.insert(name.to_string(), table_id);
        self.tables.insert(
            table_id,
            TableInfo {
                table_id,
                name: name.to_string(),
                schema,
                heap,
            },
        );
        self.flush_meta()?;
        Ok(table_id)
    }

    /// Drops the table, cascading through its indexes, and frees both the
    /// metadata pages and the heap chain.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let table_id = *self
            .table_names
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;

        let owned: Vec<IndexId> = self
            .indexes
            .values()
            .filter(|info| info.table_id == table_id)
            .map(|info| info.index_id)
            .collect();
        for index_id in owned {
            self.remove_index(index_id)?;
        }

        let table = self.tables.remove(&table_id).expect("name map out of sync");
        self.table_names.remove(name);
        table.heap.free_pages()?;

        if let Some(meta_page) = self.meta.table_meta_pages.remove(&table_id)
            && !self.pool.delete(meta_page)?
        {
            return Err(DbError::Storage(format!(
                "table meta page {meta_page:?} still pinned"
            )));
        }
        self.flush_meta()
    }

    pub fn get_table(&self, name: &str) -> DbResult<&TableInfo> {
        let table_id = self
            .table_names
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;
        self.tables
            .get(table_id)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))
    }

    pub fn get_table_by_id(&self, table_id: TableId) -> DbResult<&TableInfo> {
        self.tables
            .get(&table_id)
            .ok_or_else(|| DbError::NotFound(format!("table id {}", table_id.0)))
    }

    /// All tables, ordered by name.
    pub fn get_tables(&self) -> Vec<&TableInfo> {
        let mut tables: Vec<&TableInfo> = self.tables.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    // ------------------------------------------------------------ indexes

    /// Creates an index over the named columns and bulk-loads the table's
    /// existing rows into it.
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        columns: &[String],
    ) -> DbResult<IndexId> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::NotFound(format!("table '{table_name}'")))?;
        if columns.is_empty() {
            return Err(DbError::Constraint(
                "index must cover at least one column".into(),
            ));
        }
        if self
            .indexes
            .values()
            .any(|info| info.table_id == table_id && info.name == index_name)
        {
            return Err(DbError::AlreadyExists(format!(
                "index '{index_name}' on table '{table_name}'"
            )));
        }

        let table = self.tables.get(&table_id).expect("name map out of sync");
        let mut key_map = Vec::with_capacity(columns.len());
        for column in columns {
            let pos = table.schema.column_index(column).ok_or_else(|| {
                DbError::NotFound(format!("column '{column}' in table '{table_name}'"))
            })?;
            key_map.push(pos as u32);
        }
        let key_schema = Arc::new(table.schema.project(&key_map)?);

        let index_id = IndexId(self.next_index_id);
        let mut index =
            btree::open_index(index_id, Arc::clone(&self.pool), Arc::clone(&key_schema))?;

        // Existing rows enter the tree before the index becomes visible;
        // a uniqueness conflict aborts the whole creation.
        for row in table.heap.iter() {
            let row = row?;
            let key = row.project(&key_map)?;
            if let Err(e) = index.insert_entry(&key, row.rid()) {
                index.destroy()?;
                return Err(e);
            }
        }
        self.next_index_id += 1;

        let record = IndexMetadata {
            index_id,
            name: index_name.to_string(),
            table_id,
            key_map: key_map.clone(),
        };
        let meta_page = self.write_meta_record(|buf| record.encode(buf))?;

        self.meta.index_meta_pages.insert(index_id, meta_page);
        self.indexes.insert(
            index_id,
            IndexInfo {
                index_id,
                name: index_name.to_string(),
                table_id,
                key_map,
                key_schema,
                index,
            },
        );
        self.flush_meta()?;
        Ok(index_id)
    }

    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> DbResult<()> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::NotFound(format!("table '{table_name}'")))?;
        let index_id = self
            .indexes
            .values()
            .find(|info| info.table_id == table_id && info.name == index_name)
            .map(|info| info.index_id)
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "index '{index_name}' on table '{table_name}'"
                ))
            })?;
        self.remove_index(index_id)?;
        self.flush_meta()
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> DbResult<&IndexInfo> {
        let table = self.get_table(table_name)?;
        self.indexes
            .values()
            .find(|info| info.table_id == table.table_id && info.name == index_name)
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "index '{index_name}' on table '{table_name}'"
                ))
            })
    }

    /// All indexes of a table, ordered by name. The table must exist.
    pub fn get_table_indexes(&self, table_name: &str) -> DbResult<Vec<&IndexInfo>> {
        let table = self.get_table(table_name)?;
        let mut indexes: Vec<&IndexInfo> = self
            .indexes
            .values()
            .filter(|info| info.table_id == table.table_id)
            .collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }

    /// Mutable access to one table and every index defined on it, for DML
    /// that maintains both.
    pub fn table_and_indexes_mut(
        &mut self,
        table_name: &str,
    ) -> DbResult<(&TableInfo, Vec<&mut IndexInfo>)> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::NotFound(format!("table '{table_name}'")))?;
        let table = self
            .tables
            .get(&table_id)
            .ok_or_else(|| DbError::NotFound(format!("table '{table_name}'")))?;
        let mut indexes: Vec<&mut IndexInfo> = self
            .indexes
            .values_mut()
            .filter(|info| info.table_id == table_id)
            .collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((table, indexes))
    }

    /// Persists the catalog meta page; called after every mutation.
    pub fn flush_meta(&self) -> DbResult<()> {
        let mut buf = Vec::with_capacity(256);
        self.meta.encode(&mut buf);
        if buf.len() > PAGE_SIZE {
            return Err(DbError::Storage(
                "catalog meta exceeds a single page".into(),
            ));
        }
        {
            let page = self.pool.fetch(CATALOG_META_PAGE)?;
            let mut data = page.data_mut();
            data.fill(0);
            data[..buf.len()].copy_from_slice(&buf);
        }
        if !self.pool.flush(CATALOG_META_PAGE) {
            return Err(DbError::Storage("catalog meta page not resident".into()));
        }
        Ok(())
    }

    fn remove_index(&mut self, index_id: IndexId) -> DbResult<()> {
        let mut info = self.indexes.remove(&index_id).expect("index map out of sync");
        info.index.destroy()?;
        if let Some(meta_page) = self.meta.index_meta_pages.remove(&index_id)
            && !self.pool.delete(meta_page)?
        {
            return Err(DbError::Storage(format!(
                "index meta page {meta_page:?} still pinned"
            )));
        }
        Ok(())
    }

    /// Serializes a metadata record onto a freshly allocated page.
    fn write_meta_record(&self, encode: impl FnOnce(&mut Vec<u8>)) -> DbResult<PageId> {
        let mut buf = Vec::with_capacity(256);
        encode(&mut buf);
        if buf.len() > PAGE_SIZE {
            return Err(DbError::Storage(
                "metadata record exceeds a single page".into(),
            ));
        }
        let (pid, page) = self.pool.new_page()?;
        let mut data = page.data_mut();
        data[..buf.len()].copy_from_slice(&buf);
        Ok(pid)
    }
}
